use chrono::{Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use mangahub::client::*;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum RefreshReply {
    Rotate,
    Reject,
    Hang,
}

/// Scripted stand-in for the API. Protected paths accept only the access token
/// minted by the latest rotation.
struct FakeApi {
    valid_access: Mutex<String>,
    valid_refresh: Mutex<String>,
    refresh_reply: RefreshReply,
    refresh_delay: Duration,
    rotations: AtomicUsize,
    refresh_calls: AtomicUsize,
    protected_calls: AtomicUsize,
    always_unauthorized: AtomicBool,
    revoked: Mutex<Vec<String>>,
}

impl FakeApi {
    fn new(refresh_reply: RefreshReply) -> Self {
        Self {
            valid_access: Mutex::new("access-0".to_string()),
            valid_refresh: Mutex::new("refresh-0".to_string()),
            refresh_reply,
            refresh_delay: Duration::from_millis(20),
            rotations: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            protected_calls: AtomicUsize::new(0),
            always_unauthorized: AtomicBool::new(false),
            revoked: Mutex::new(Vec::new()),
        }
    }

    fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn protected_calls(&self) -> usize {
        self.protected_calls.load(Ordering::SeqCst)
    }

    fn unauthorized(code: &str) -> ApiResponse {
        ApiResponse {
            status: 401,
            body: json!({"error": {"code": code, "message": code}}),
        }
    }

    fn issue(&self) -> ApiResponse {
        let n = self.rotations.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("access-{n}");
        let refresh = format!("refresh-{n}");
        *self.valid_access.lock().unwrap() = access.clone();
        *self.valid_refresh.lock().unwrap() = refresh.clone();
        ApiResponse {
            status: 200,
            body: json!({
                "token": access,
                "refreshToken": refresh,
                "refreshTokenExpires": Utc::now() + ChronoDuration::days(7),
            }),
        }
    }

    async fn refresh(&self, request: &ApiRequest) -> ApiResponse {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.refresh_delay).await;
        match self.refresh_reply {
            RefreshReply::Hang => std::future::pending().await,
            RefreshReply::Reject => Self::unauthorized("InvalidRefreshToken"),
            RefreshReply::Rotate => {
                let presented = request
                    .body
                    .as_ref()
                    .and_then(|b| b["refreshToken"].as_str())
                    .unwrap_or_default()
                    .to_string();
                if presented != *self.valid_refresh.lock().unwrap() {
                    return Self::unauthorized("InvalidRefreshToken");
                }
                self.issue()
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for FakeApi {
    async fn send(
        &self,
        request: &ApiRequest,
        access_token: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        match request.path.as_str() {
            REFRESH_PATH => Ok(self.refresh(request).await),
            "/api/auth" if request.method == reqwest::Method::POST => Ok(self.issue()),
            "/api/broken" => Ok(ApiResponse {
                status: 500,
                body: json!({"error": {"code": "InternalError", "message": "Server error"}}),
            }),
            path => {
                self.protected_calls.fetch_add(1, Ordering::SeqCst);
                if path == "/api/slow" {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                let valid = self.valid_access.lock().unwrap().clone();
                if self.always_unauthorized.load(Ordering::SeqCst)
                    || access_token != Some(valid.as_str())
                {
                    return Ok(Self::unauthorized("ExpiredToken"));
                }
                if path == "/api/auth/logout" {
                    let presented = request
                        .body
                        .as_ref()
                        .and_then(|b| b["refreshToken"].as_str())
                        .unwrap_or_default()
                        .to_string();
                    self.revoked.lock().unwrap().push(presented);
                    return Ok(ApiResponse {
                        status: 200,
                        body: json!({"msg": "Logged out successfully"}),
                    });
                }
                Ok(ApiResponse {
                    status: 200,
                    body: json!({"path": path}),
                })
            }
        }
    }
}

fn stale_session() -> StoredSession {
    StoredSession {
        access_token: "access-expired".to_string(),
        refresh_token: "refresh-0".to_string(),
        refresh_token_expires: Some(Utc::now() + ChronoDuration::days(7)),
    }
}

fn client_with(
    api: &Arc<FakeApi>,
    session: Option<StoredSession>,
) -> (ApiClient, Arc<MemoryTokenStorage>) {
    let storage = Arc::new(match session {
        Some(s) => MemoryTokenStorage::with_session(s),
        None => MemoryTokenStorage::new(),
    });
    let client = ApiClient::new(api.clone(), storage.clone()).unwrap();
    (client, storage)
}

async fn fetch(client: &ApiClient, i: usize) -> Result<Value, ClientError> {
    client.get(&format!("/api/items/{i}")).await
}

#[tokio::test]
async fn concurrent_401s_share_a_single_refresh() {
    let api = Arc::new(FakeApi::new(RefreshReply::Rotate));
    let (client, storage) = client_with(&api, Some(stale_session()));

    let results = join_all((0..5).map(|i| fetch(&client, i))).await;

    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), json!({"path": format!("/api/items/{i}")}));
    }
    assert_eq!(api.refresh_calls(), 1);
    assert_eq!(api.protected_calls(), 10);
    assert_eq!(storage.load().unwrap().unwrap().access_token, "access-1");
    assert_eq!(storage.load().unwrap().unwrap().refresh_token, "refresh-1");
    assert_eq!(client.session_state(), SessionState::LoggedIn);
    assert!(!client.gate().is_refreshing());
    assert_eq!(client.gate().pending(), 0);
}

#[tokio::test]
async fn failed_refresh_rejects_every_queued_request_and_logs_out() {
    let api = Arc::new(FakeApi::new(RefreshReply::Reject));
    let (client, storage) = client_with(&api, Some(stale_session()));
    let mut session = client.subscribe();
    assert_eq!(*session.borrow_and_update(), SessionState::LoggedIn);

    let results = join_all((0..4).map(|i| fetch(&client, i))).await;

    for result in results {
        assert!(
            matches!(result, Err(ClientError::RefreshRejected(_))),
            "{result:?}"
        );
    }
    assert_eq!(api.refresh_calls(), 1);
    assert_eq!(api.protected_calls(), 4);
    assert!(storage.load().unwrap().is_none());
    assert!(session.has_changed().unwrap());
    assert_eq!(*session.borrow_and_update(), SessionState::LoggedOut);
}

#[tokio::test]
async fn no_usable_refresh_token_fails_without_a_refresh_call() {
    let api = Arc::new(FakeApi::new(RefreshReply::Rotate));

    let (client, _) = client_with(&api, None);
    assert_eq!(client.session_state(), SessionState::LoggedOut);
    assert_eq!(
        client.get("/api/items").await,
        Err(ClientError::RefreshExhausted)
    );

    let mut expired = stale_session();
    expired.refresh_token_expires = Some(Utc::now() - ChronoDuration::seconds(1));
    let (client, storage) = client_with(&api, Some(expired));
    assert_eq!(
        client.get("/api/items").await,
        Err(ClientError::RefreshExhausted)
    );
    assert!(storage.load().unwrap().is_none());

    let mut blank = stale_session();
    blank.refresh_token = String::new();
    let (client, _) = client_with(&api, Some(blank));
    assert_eq!(
        client.get("/api/items").await,
        Err(ClientError::RefreshExhausted)
    );
    assert_eq!(client.session_state(), SessionState::LoggedOut);

    assert_eq!(api.refresh_calls(), 0);
}

#[tokio::test]
async fn a_replayed_request_is_never_refreshed_again() {
    let api = Arc::new(FakeApi::new(RefreshReply::Rotate));
    api.always_unauthorized.store(true, Ordering::SeqCst);
    let (client, _) = client_with(&api, Some(stale_session()));

    let result = client.get("/api/items").await;
    assert!(matches!(result, Err(ClientError::Unauthorized(_))), "{result:?}");
    assert_eq!(api.refresh_calls(), 1);
    assert_eq!(api.protected_calls(), 2);
    assert_eq!(client.session_state(), SessionState::LoggedIn);
}

#[tokio::test]
async fn a_late_401_reuses_the_refresh_that_already_happened() {
    let api = Arc::new(FakeApi::new(RefreshReply::Rotate));
    let (client, _) = client_with(&api, Some(stale_session()));

    let (slow, fast) = tokio::join!(client.get("/api/slow"), client.get("/api/fast"));

    assert_eq!(fast.unwrap(), json!({"path": "/api/fast"}));
    assert_eq!(slow.unwrap(), json!({"path": "/api/slow"}));
    assert_eq!(api.refresh_calls(), 1);
    assert_eq!(client.gate().generation(), 1);
}

#[tokio::test]
async fn a_hung_refresh_times_out_and_logs_out() {
    let api = Arc::new(FakeApi::new(RefreshReply::Hang));
    let (client, storage) = client_with(&api, Some(stale_session()));
    let client = client.with_refresh_timeout(Duration::from_millis(100));

    let results = join_all((0..3).map(|i| fetch(&client, i))).await;

    for result in results {
        assert_eq!(result, Err(ClientError::Timeout));
    }
    assert_eq!(api.refresh_calls(), 1);
    assert!(storage.load().unwrap().is_none());
    assert_eq!(client.session_state(), SessionState::LoggedOut);
}

#[tokio::test]
async fn a_401_on_the_refresh_endpoint_itself_ends_the_session() {
    let api = Arc::new(FakeApi::new(RefreshReply::Reject));
    let (client, storage) = client_with(&api, Some(stale_session()));

    let result = client
        .send(ApiRequest::post(REFRESH_PATH, json!({"refreshToken": "refresh-0"})))
        .await;
    assert_eq!(
        result,
        Err(ClientError::RefreshRejected("InvalidRefreshToken".to_string()))
    );
    assert_eq!(api.refresh_calls(), 1);
    assert!(storage.load().unwrap().is_none());
}

#[tokio::test]
async fn other_failures_pass_through_untouched() {
    let api = Arc::new(FakeApi::new(RefreshReply::Rotate));
    let (client, storage) = client_with(&api, Some(stale_session()));

    let result = client.get("/api/broken").await;
    assert_eq!(
        result,
        Err(ClientError::Status {
            status: 500,
            message: "Server error".to_string()
        })
    );
    assert_eq!(api.refresh_calls(), 0);
    assert_eq!(storage.load().unwrap(), Some(stale_session()));
}

#[tokio::test]
async fn login_then_logout_round_trip() {
    let api = Arc::new(FakeApi::new(RefreshReply::Rotate));
    let (client, storage) = client_with(&api, None);
    let mut session = client.subscribe();

    client.login("alice@example.com", "secret1").await.unwrap();
    assert_eq!(*session.borrow_and_update(), SessionState::LoggedIn);
    assert_eq!(
        client.get("/api/items").await.unwrap(),
        json!({"path": "/api/items"})
    );
    assert_eq!(api.refresh_calls(), 0);

    client.logout().await.unwrap();
    assert_eq!(*session.borrow_and_update(), SessionState::LoggedOut);
    assert!(storage.load().unwrap().is_none());
}

#[tokio::test]
async fn logout_with_an_expired_access_token_refreshes_then_revokes() {
    let api = Arc::new(FakeApi::new(RefreshReply::Rotate));
    let (client, storage) = client_with(&api, Some(stale_session()));

    client.logout().await.unwrap();

    assert_eq!(api.refresh_calls(), 1);
    assert_eq!(*api.revoked.lock().unwrap(), vec!["refresh-1".to_string()]);
    assert!(storage.load().unwrap().is_none());
    assert_eq!(client.session_state(), SessionState::LoggedOut);
}

#[tokio::test]
async fn logout_clears_locally_when_the_refresh_is_refused() {
    let api = Arc::new(FakeApi::new(RefreshReply::Reject));
    let (client, storage) = client_with(&api, Some(stale_session()));

    client.logout().await.unwrap();

    assert_eq!(api.refresh_calls(), 1);
    assert!(api.revoked.lock().unwrap().is_empty());
    assert!(storage.load().unwrap().is_none());
    assert_eq!(client.session_state(), SessionState::LoggedOut);
}
