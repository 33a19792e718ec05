use super::error::error_message;
use super::*;
use crate::domain_model::UserProfile;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

const UNAUTHORIZED: u16 = 401;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionState {
    LoggedIn,
    LoggedOut,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
    token: String,
    refresh_token: String,
    #[serde(default)]
    refresh_token_expires: Option<DateTime<Utc>>,
}

impl From<TokenPayload> for StoredSession {
    fn from(p: TokenPayload) -> Self {
        StoredSession {
            access_token: p.token,
            refresh_token: p.refresh_token,
            refresh_token_expires: p.refresh_token_expires,
        }
    }
}

/// HTTP client for the mangahub API that renews the access token on 401.
///
/// Concurrent requests that fail together trigger one refresh; the rest wait
/// on the [`RefreshGate`] and are replayed once with the new token.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn TokenStorage>,
    gate: RefreshGate,
    session: watch::Sender<SessionState>,
    refresh_timeout: Duration,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn TokenStorage>,
    ) -> Result<Self, ClientError> {
        let initial = match storage.load()? {
            Some(_) => SessionState::LoggedIn,
            None => SessionState::LoggedOut,
        };
        let (session, _) = watch::channel(initial);
        Ok(Self {
            transport,
            storage,
            gate: RefreshGate::new(),
            session,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        })
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        *self.session.borrow()
    }

    pub fn gate(&self) -> &RefreshGate {
        &self.gate
    }

    pub fn stored_session(&self) -> Result<Option<StoredSession>, ClientError> {
        self.storage.load()
    }

    fn access_token(&self) -> Result<Option<String>, ClientError> {
        Ok(self.storage.load()?.map(|s| s.access_token))
    }

    fn start_session(&self, session: &StoredSession) -> Result<(), ClientError> {
        self.storage.save(session)?;
        self.session.send_replace(SessionState::LoggedIn);
        Ok(())
    }

    fn end_session(&self) {
        if let Err(e) = self.storage.clear() {
            tracing::warn!("clearing stored tokens: {e}");
        }
        self.session.send_replace(SessionState::LoggedOut);
    }

    fn into_result(response: ApiResponse) -> Result<Value, ClientError> {
        if response.is_success() {
            Ok(response.body)
        } else {
            Err(ClientError::from_status(response.status, &response.body))
        }
    }

    fn decode<T: DeserializeOwned>(body: Value) -> Result<T, ClientError> {
        serde_json::from_value(body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Send an authenticated request, refreshing and replaying once on 401.
    pub async fn send(&self, request: ApiRequest) -> Result<Value, ClientError> {
        let seen_generation = self.gate.generation();
        let token = self.access_token()?;
        let response = self.transport.send(&request, token.as_deref()).await?;

        if response.status != UNAUTHORIZED {
            return Self::into_result(response);
        }
        if request.path == REFRESH_PATH {
            self.end_session();
            return Err(ClientError::RefreshRejected(error_message(&response.body)));
        }
        if request.retried {
            return Err(ClientError::Unauthorized(error_message(&response.body)));
        }

        let token = self.renew(seen_generation).await?;

        let mut replay = request;
        replay.retried = true;
        let response = self.transport.send(&replay, Some(&token)).await?;
        if response.status == UNAUTHORIZED {
            return Err(ClientError::Unauthorized(error_message(&response.body)));
        }
        Self::into_result(response)
    }

    /// Obtain a usable access token after a 401, refreshing at most once per
    /// burst of failures.
    async fn renew(&self, seen_generation: u64) -> Result<String, ClientError> {
        match self.gate.admit(seen_generation) {
            Admission::Renewed => self.access_token()?.ok_or(ClientError::RefreshExhausted),
            Admission::Failed(e) => Err(e),
            Admission::Queued(rx) => rx.await.unwrap_or(Err(ClientError::RefreshAborted)),
            Admission::Leader(lease) => {
                let outcome = self.run_refresh().await;
                if let Err(e) = &outcome {
                    tracing::info!("token refresh failed, logging out: {e}");
                    self.end_session();
                }
                lease.settle(outcome.clone());
                outcome
            }
        }
    }

    async fn run_refresh(&self) -> Result<String, ClientError> {
        let Some(session) = self.storage.load()? else {
            return Err(ClientError::RefreshExhausted);
        };
        if session.refresh_token.is_empty() || session.refresh_expired(Utc::now()) {
            return Err(ClientError::RefreshExhausted);
        }

        let request = ApiRequest::post(
            REFRESH_PATH,
            json!({ "refreshToken": session.refresh_token }),
        );
        let response =
            tokio::time::timeout(self.refresh_timeout, self.transport.send(&request, None))
                .await
                .map_err(|_| ClientError::Timeout)??;

        if response.status == UNAUTHORIZED {
            return Err(ClientError::RefreshRejected(error_message(&response.body)));
        }
        let body = Self::into_result(response)?;
        let renewed = StoredSession::from(Self::decode::<TokenPayload>(body)?);

        self.start_session(&renewed)?;
        tracing::debug!("access token refreshed");
        Ok(renewed.access_token)
    }

    /// Requests that never carry a token and never trigger a refresh.
    async fn send_public(&self, request: ApiRequest) -> Result<Value, ClientError> {
        Self::into_result(self.transport.send(&request, None).await?)
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        let body = self
            .send_public(ApiRequest::post(
                "/api/users",
                json!({ "username": username, "email": email, "password": password }),
            ))
            .await?;
        self.start_session(&StoredSession::from(Self::decode::<TokenPayload>(body)?))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<(), ClientError> {
        let body = self
            .send_public(ApiRequest::post(
                "/api/auth",
                json!({ "email": email, "password": password }),
            ))
            .await?;
        self.start_session(&StoredSession::from(Self::decode::<TokenPayload>(body)?))
    }

    /// Best effort server-side revocation; local tokens are always cleared.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let stored = self.storage.load();
        if let Ok(Some(_)) = &stored {
            if let Err(e) = self.revoke_on_server().await {
                tracing::debug!("server logout failed: {e}");
            }
        }
        self.end_session();
        stored.map(|_| ())
    }

    fn logout_request(session: &StoredSession) -> ApiRequest {
        ApiRequest::post(
            "/api/auth/logout",
            json!({ "refreshToken": session.refresh_token }),
        )
    }

    /// Revoke the stored refresh token. An expired access token is renewed
    /// through the gate first, and the rotated refresh token is revoked.
    async fn revoke_on_server(&self) -> Result<(), ClientError> {
        let seen_generation = self.gate.generation();
        let Some(session) = self.storage.load()? else {
            return Ok(());
        };
        let response = self
            .transport
            .send(&Self::logout_request(&session), Some(&session.access_token))
            .await?;
        if response.status != UNAUTHORIZED {
            return Self::into_result(response).map(|_| ());
        }

        let token = self.renew(seen_generation).await?;
        let Some(session) = self.storage.load()? else {
            return Ok(());
        };
        let mut replay = Self::logout_request(&session);
        replay.retried = true;
        Self::into_result(self.transport.send(&replay, Some(&token)).await?).map(|_| ())
    }

    pub async fn current_user(&self) -> Result<UserProfile, ClientError> {
        let body = self.get("/api/auth").await?;
        Self::decode(body)
    }

    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<String, ClientError> {
        let body = self
            .put(
                "/api/users/password",
                json!({ "currentPassword": current_password, "newPassword": new_password }),
            )
            .await?;
        Ok(error_message(&body))
    }

    pub async fn get(&self, path: &str) -> Result<Value, ClientError> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        self.send(ApiRequest::post(path, body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value, ClientError> {
        self.send(ApiRequest::put(path, body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ClientError> {
        self.send(ApiRequest::delete(path)).await
    }
}
