use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::VecDeque;

struct UserDocument {
    credentials: CredentialRecord,
    refresh_tokens: VecDeque<RefreshTokenRecord>,
}

impl UserDocument {
    /// Drop the oldest tokens until at most `cap` remain. Returns the evicted digests.
    fn evict_beyond(&mut self, cap: usize) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.refresh_tokens.len() > cap {
            match self.refresh_tokens.pop_front() {
                Some(rec) => evicted.push(rec.digest),
                None => break,
            }
        }
        evicted
    }

    fn take_token(&mut self, digest: &str) -> Option<RefreshTokenRecord> {
        let pos = self.refresh_tokens.iter().position(|r| r.digest == digest)?;
        self.refresh_tokens.remove(pos)
    }
}

/// Process-local credential store.
///
/// Each user's document (credentials and refresh-token list) is guarded by its
/// `users` shard lock; the `tokens` index maps digests to owners. The per-user
/// list is authoritative, the index only locates the owner. Locks are always
/// taken `users` before `tokens`, and `emails` before `usernames`.
#[derive(Default)]
pub struct MemoryCredentialStore {
    users: DashMap<UserId, UserDocument>,
    emails: DashMap<String, UserId>,
    usernames: DashMap<String, UserId>,
    tokens: DashMap<String, UserId>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn unindex(&self, digests: &[String]) {
        for digest in digests {
            self.tokens.remove(digest);
        }
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn create_user(&self, record: CredentialRecord) -> Result<(), AuthError> {
        let email_slot = match self.emails.entry(record.email.clone()) {
            Entry::Occupied(_) => return Err(AuthError::UserExists),
            Entry::Vacant(v) => v,
        };
        let username_slot = match self.usernames.entry(username_key(&record.username)) {
            Entry::Occupied(_) => return Err(AuthError::UserExists),
            Entry::Vacant(v) => v,
        };

        let user_id = record.user_id;
        self.users.insert(
            user_id,
            UserDocument {
                credentials: record,
                refresh_tokens: VecDeque::new(),
            },
        );
        username_slot.insert(user_id);
        email_slot.insert(user_id);
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, AuthError> {
        let Some(user_id) = self.emails.get(email).map(|r| *r.value()) else {
            return Ok(None);
        };
        self.find_by_id(user_id).await
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<CredentialRecord>, AuthError> {
        Ok(self.users.get(&user_id).map(|doc| doc.credentials.clone()))
    }

    async fn push_refresh_token(
        &self,
        user_id: UserId,
        record: RefreshTokenRecord,
        cap: usize,
    ) -> Result<usize, AuthError> {
        let mut doc = self.users.get_mut(&user_id).ok_or(AuthError::UserNotFound)?;
        self.tokens.insert(record.digest.clone(), user_id);
        doc.refresh_tokens.push_back(record);
        let evicted = doc.evict_beyond(cap);
        self.unindex(&evicted);
        Ok(evicted.len())
    }

    async fn rotate_refresh_token(
        &self,
        presented_digest: &str,
        replacement: RefreshTokenRecord,
        cap: usize,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, AuthError> {
        let Some(owner) = self.tokens.get(presented_digest).map(|r| *r.value()) else {
            return Ok(RotateOutcome::Missing);
        };

        let Some(mut doc) = self.users.get_mut(&owner) else {
            self.tokens.remove(presented_digest);
            return Ok(RotateOutcome::Missing);
        };

        // A concurrent rotation may have consumed it between the lookups.
        let Some(presented) = doc.take_token(presented_digest) else {
            return Ok(RotateOutcome::Missing);
        };
        self.tokens.remove(presented_digest);

        if presented.is_expired(now) {
            return Ok(RotateOutcome::Expired { user_id: owner });
        }

        self.tokens.insert(replacement.digest.clone(), owner);
        doc.refresh_tokens.push_back(replacement);
        let evicted = doc.evict_beyond(cap);
        self.unindex(&evicted);

        Ok(RotateOutcome::Rotated {
            user_id: owner,
            evicted: evicted.len(),
        })
    }

    async fn revoke_refresh_token(
        &self,
        user_id: UserId,
        digest: &str,
    ) -> Result<bool, AuthError> {
        let Some(mut doc) = self.users.get_mut(&user_id) else {
            return Ok(false);
        };
        let removed = doc.take_token(digest).is_some();
        if removed {
            self.tokens.remove(digest);
        }
        Ok(removed)
    }

    async fn revoke_all(&self, user_id: UserId) -> Result<usize, AuthError> {
        let Some(mut doc) = self.users.get_mut(&user_id) else {
            return Ok(0);
        };
        let drained: Vec<String> = doc.refresh_tokens.drain(..).map(|r| r.digest).collect();
        self.unindex(&drained);
        Ok(drained.len())
    }

    async fn change_password(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<usize, AuthError> {
        let mut doc = self.users.get_mut(&user_id).ok_or(AuthError::UserNotFound)?;
        doc.credentials.password_hash = password_hash.to_string();
        let drained: Vec<String> = doc.refresh_tokens.drain(..).map(|r| r.digest).collect();
        self.unindex(&drained);
        Ok(drained.len())
    }

    async fn refresh_tokens(&self, user_id: UserId) -> Result<Vec<RefreshTokenRecord>, AuthError> {
        Ok(self
            .users
            .get(&user_id)
            .map(|doc| doc.refresh_tokens.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError> {
        let mut purged = 0;
        for mut doc in self.users.iter_mut() {
            let mut expired = Vec::new();
            doc.refresh_tokens.retain(|r| {
                if r.is_expired(now) {
                    expired.push(r.digest.clone());
                    false
                } else {
                    true
                }
            });
            self.unindex(&expired);
            purged += expired.len();
        }
        Ok(purged)
    }
}
