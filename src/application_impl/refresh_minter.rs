use crate::application_port::{AuthError, RefreshToken};
use crate::domain_model::RefreshTokenRecord;
use chrono::{DateTime, Utc};
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;
use std::time::Duration;

const REFRESH_TOKEN_LEN: usize = 64;

/// Mints opaque refresh tokens. The plain token goes to the client, only its
/// keyed digest is persisted.
pub struct RefreshTokenMinter {
    digest_key: Vec<u8>,
    ttl: chrono::Duration,
}

impl RefreshTokenMinter {
    pub fn new(digest_key: Vec<u8>, ttl: Duration) -> Result<Self, AuthError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        Ok(Self { digest_key, ttl })
    }

    pub fn digest(&self, token: &str) -> Result<String, AuthError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.digest_key)
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        mac.update(token.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn mint(&self, now: DateTime<Utc>) -> Result<(RefreshToken, RefreshTokenRecord), AuthError> {
        let token = nanoid::nanoid!(REFRESH_TOKEN_LEN);
        let record = RefreshTokenRecord {
            digest: self.digest(&token)?,
            expires_at: now + self.ttl,
            created_at: now,
        };
        Ok((RefreshToken(token), record))
    }
}
