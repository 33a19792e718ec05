//! Full stack: a bound warp server with the in-memory store, driven through
//! the real HTTP client.

use chrono::{Duration, Utc};
use futures_util::future::join_all;
use mangahub::application_impl::ManualClock;
use mangahub::client::*;
use mangahub::domain_port::CredentialStore;
use mangahub::server::Server;
use mangahub::settings::parse_settings_str;
use std::sync::Arc;

const SETTINGS: &str = r#"
[auth]
jwt_secret = "end-to-end-secret"
issuer = "mangahub.auth"
audience = "mangahub-client"

[http]
address = "127.0.0.1:0"

[log]
filter = "warn"

[store]
backend = "memory"
"#;

struct Harness {
    server: Server,
    clock: Arc<ManualClock>,
    base_url: String,
}

impl Harness {
    async fn start() -> Self {
        let settings = parse_settings_str(SETTINGS).unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let server = Server::try_new_with_clock(&settings, clock.clone())
            .await
            .unwrap();

        let (addr, serving) = warp::serve(server.filter()).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(serving);

        Harness {
            server,
            clock,
            base_url: format!("http://{addr}"),
        }
    }

    fn client(&self) -> (ApiClient, Arc<MemoryTokenStorage>) {
        let transport = Arc::new(
            ReqwestTransport::new(self.base_url.clone(), std::time::Duration::from_secs(10))
                .unwrap(),
        );
        let storage = Arc::new(MemoryTokenStorage::new());
        let client = ApiClient::new(transport, storage.clone()).unwrap();
        (client, storage)
    }
}

#[tokio::test]
async fn expired_access_tokens_are_renewed_transparently() {
    let h = Harness::start().await;
    let (client, storage) = h.client();

    client
        .register("alice", "alice@example.com", "secret1")
        .await
        .unwrap();
    let first = storage.load().unwrap().unwrap();
    assert_eq!(client.current_user().await.unwrap().username, "alice");

    h.clock.advance(Duration::minutes(16));
    let profiles = join_all((0..3).map(|_| client.current_user())).await;
    for profile in profiles {
        assert_eq!(profile.unwrap().email, "alice@example.com");
    }

    let renewed = storage.load().unwrap().unwrap();
    assert_ne!(renewed.access_token, first.access_token);
    assert_ne!(renewed.refresh_token, first.refresh_token);
    assert_eq!(client.gate().generation(), 1);
    assert_eq!(client.session_state(), SessionState::LoggedIn);

    h.server.shutdown().await;
}

#[tokio::test]
async fn an_expired_refresh_token_logs_the_client_out() {
    let h = Harness::start().await;
    let (client, storage) = h.client();
    client
        .register("bob", "bob@example.com", "secret1")
        .await
        .unwrap();

    h.clock.advance(Duration::days(8));
    let result = client.current_user().await;
    assert!(
        matches!(result, Err(ClientError::RefreshRejected(_))),
        "{result:?}"
    );
    assert!(storage.load().unwrap().is_none());
    assert_eq!(client.session_state(), SessionState::LoggedOut);

    h.server.shutdown().await;
}

#[tokio::test]
async fn changing_the_password_ends_other_sessions() {
    let h = Harness::start().await;
    let (laptop, _) = h.client();
    let (phone, phone_storage) = h.client();

    laptop
        .register("carol", "carol@example.com", "secret1")
        .await
        .unwrap();
    phone.login("carol@example.com", "secret1").await.unwrap();

    let msg = laptop
        .change_password("secret1", "much-better")
        .await
        .unwrap();
    assert!(!msg.is_empty());

    h.clock.advance(Duration::minutes(16));
    assert!(matches!(
        phone.current_user().await,
        Err(ClientError::RefreshRejected(_))
    ));
    assert!(phone_storage.load().unwrap().is_none());

    assert!(matches!(
        phone.login("carol@example.com", "secret1").await,
        Err(ClientError::Status { status: 400, .. })
    ));
    phone
        .login("carol@example.com", "much-better")
        .await
        .unwrap();
    assert_eq!(phone.current_user().await.unwrap().username, "carol");

    phone.logout().await.unwrap();
    assert_eq!(phone.session_state(), SessionState::LoggedOut);

    h.server.shutdown().await;
}

#[tokio::test]
async fn logout_after_idle_still_revokes_the_session() {
    let h = Harness::start().await;
    let (client, storage) = h.client();
    client
        .register("dave", "dave@example.com", "secret1")
        .await
        .unwrap();
    let user_id = client.current_user().await.unwrap().id;

    h.clock.advance(Duration::minutes(16));
    client.logout().await.unwrap();

    assert!(storage.load().unwrap().is_none());
    assert_eq!(client.session_state(), SessionState::LoggedOut);
    assert!(
        h.server
            .credential_store
            .refresh_tokens(user_id)
            .await
            .unwrap()
            .is_empty()
    );

    h.server.shutdown().await;
}
