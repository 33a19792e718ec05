use crate::application_port::*;
use crate::domain_model::*;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub user_id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.user_id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            created_at: self.created_at,
        }
    }
}

/// Result of presenting a refresh token for rotation.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RotateOutcome {
    /// The presented token was consumed and the replacement persisted.
    Rotated { user_id: UserId, evicted: usize },
    /// The presented token was known but past its expiry; it has been removed.
    Expired { user_id: UserId },
    /// No user currently holds the presented token.
    Missing,
}

#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fails with `UserExists` if the email or the username is taken.
    async fn create_user(&self, record: CredentialRecord) -> Result<(), AuthError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, AuthError>;

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<CredentialRecord>, AuthError>;

    /// Append a refresh token, evicting the oldest entries beyond `cap`.
    /// Returns how many were evicted.
    async fn push_refresh_token(
        &self,
        user_id: UserId,
        record: RefreshTokenRecord,
        cap: usize,
    ) -> Result<usize, AuthError>;

    /// Consume `presented_digest` and persist `replacement` for the same user as
    /// one atomic step. Of several concurrent calls with the same digest at most
    /// one observes `Rotated`.
    async fn rotate_refresh_token(
        &self,
        presented_digest: &str,
        replacement: RefreshTokenRecord,
        cap: usize,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, AuthError>;

    /// Returns whether the token was present.
    async fn revoke_refresh_token(&self, user_id: UserId, digest: &str)
    -> Result<bool, AuthError>;

    async fn revoke_all(&self, user_id: UserId) -> Result<usize, AuthError>;

    /// Store a new password hash and drop every refresh token of the user in
    /// the same step. Returns how many tokens were revoked.
    async fn change_password(&self, user_id: UserId, password_hash: &str)
    -> Result<usize, AuthError>;

    /// Oldest first.
    async fn refresh_tokens(&self, user_id: UserId) -> Result<Vec<RefreshTokenRecord>, AuthError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, AuthError>;
}
