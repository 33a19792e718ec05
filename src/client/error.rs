use serde_json::Value;

/// Errors surfaced to callers of [`super::ApiClient`].
///
/// `Clone` so a single refresh outcome can be handed to every queued request.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    /// A request still got 401 after being replayed with a fresh token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The server refused the refresh token.
    #[error("refresh rejected: {0}")]
    RefreshRejected(String),
    /// No usable refresh token is stored locally.
    #[error("session expired, log in again")]
    RefreshExhausted,
    /// The request driving the refresh was dropped before it finished.
    #[error("refresh aborted")]
    RefreshAborted,
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("token storage error: {0}")]
    Storage(String),
}

impl ClientError {
    pub fn from_status(status: u16, body: &Value) -> Self {
        ClientError::Status {
            status,
            message: error_message(body),
        }
    }
}

/// Pull a human readable message out of an error body. Understands both
/// `{"error": {"message"}}` and `{"msg"}`.
pub fn error_message(body: &Value) -> String {
    body.pointer("/error/message")
        .or_else(|| body.get("msg"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_both_error_shapes() {
        let nested = json!({"error": {"code": "ExpiredToken", "message": "Token has expired"}});
        assert_eq!(error_message(&nested), "Token has expired");
        assert_eq!(error_message(&json!({"msg": "bye"})), "bye");
        assert_eq!(error_message(&Value::Null), "");
    }
}
