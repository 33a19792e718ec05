//! Shared setup for the integration tests: an in-memory token service driven by
//! a manual clock.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use mangahub::application_impl::*;
use mangahub::application_port::*;
use mangahub::domain_port::*;
use mangahub::infra_memory::MemoryCredentialStore;
use std::sync::Arc;
use std::time::Duration;

pub const ACCESS_TTL: Duration = Duration::from_secs(15 * 60);
pub const REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const PASSWORD: &str = "secret1";

pub struct TestService {
    pub service: Arc<RealAuthService>,
    pub store: Arc<MemoryCredentialStore>,
    pub clock: Arc<ManualClock>,
    pub minter: Arc<RefreshTokenMinter>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn build_service() -> TestService {
    build_service_with_cap(5)
}

pub fn build_service_with_cap(cap: usize) -> TestService {
    let clock = Arc::new(ManualClock::new(start_time()));
    let store = Arc::new(MemoryCredentialStore::new());
    let minter = Arc::new(
        RefreshTokenMinter::new(b"test-digest-key".to_vec(), REFRESH_TTL).unwrap(),
    );
    let codec = Arc::new(JwtHs256Codec::new(
        JwtConfig {
            issuer: "mangahub.auth".to_string(),
            audience: "mangahub-client".to_string(),
            access_ttl: ACCESS_TTL,
            signing_key: b"test-signing-key".to_vec(),
        },
        clock.clone(),
    ));
    let hasher = Arc::new(Argon2PasswordHasher::insecure_fast().unwrap());

    let service = Arc::new(
        RealAuthService::new(store.clone(), hasher, codec, minter.clone(), clock.clone())
            .with_max_refresh_tokens(cap),
    );

    TestService {
        service,
        store,
        clock,
        minter,
    }
}

pub fn register_input(username: &str) -> RegisterInput {
    RegisterInput {
        username: username.to_string(),
        email: format!("{username}@example.com"),
        password: PASSWORD.to_string(),
    }
}

pub fn login_input(username: &str) -> LoginInput {
    LoginInput {
        email: format!("{username}@example.com"),
        password: PASSWORD.to_string(),
    }
}

impl TestService {
    pub async fn register(&self, username: &str) -> AuthTokens {
        self.service.register(register_input(username)).await.unwrap()
    }

    pub async fn user_id(&self, tokens: &AuthTokens) -> mangahub::domain_model::UserId {
        self.service
            .authenticate(Some(&tokens.access_token.0))
            .await
            .unwrap()
            .user_id
    }

    pub async fn stored_token_count(&self, tokens: &AuthTokens) -> usize {
        let user_id = self.user_id(tokens).await;
        self.store.refresh_tokens(user_id).await.unwrap().len()
    }
}
