use chrono::{DateTime, Utc};

/// Upper bound on concurrently valid refresh tokens per user.
pub const DEFAULT_MAX_REFRESH_TOKENS: usize = 5;

/// A persisted refresh token. Stores only the keyed digest of the token
/// string handed to the client.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RefreshTokenRecord {
    pub digest: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
