use crate::application_port::*;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use tracing::warn;
use warp::http::StatusCode;
use warp::{Rejection, reject};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ApiError,
}

/// The body of every failed request and the rejection carried through warp.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ApiErrorCode) -> Self {
        ApiError {
            message: code.to_string(),
            code,
        }
    }

    pub fn with_message(code: ApiErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
        }
    }

    pub fn internal<E: std::fmt::Display>(error: E) -> Self {
        warn!("internal error: {}", error);
        ApiError::new(ApiErrorCode::InternalError)
    }
}

impl reject::Reject for ApiError {}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Error, Serialize)]
pub enum ApiErrorCode {
    #[error("No token, authorization denied")]
    NoToken,
    #[error("Token is not valid")]
    InvalidToken,
    #[error("Token has expired")]
    ExpiredToken,
    #[error("Refresh token is not valid")]
    InvalidRefreshToken,
    #[error("Refresh token has expired")]
    ExpiredRefreshToken,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("User already exists")]
    UserExists,
    #[error("User not found")]
    UserNotFound,
    #[error("Validation failed")]
    ValidationFailed,
    #[error("Malformed request body")]
    BadRequest,
    #[error("Request body too large")]
    PayloadTooLarge,
    #[error("Not found")]
    NotFound,
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Origin not allowed")]
    Forbidden,
    #[error("Server error")]
    InternalError,
}

impl ApiErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiErrorCode::NoToken
            | ApiErrorCode::InvalidToken
            | ApiErrorCode::ExpiredToken
            | ApiErrorCode::InvalidRefreshToken
            | ApiErrorCode::ExpiredRefreshToken => StatusCode::UNAUTHORIZED,
            ApiErrorCode::InvalidCredentials
            | ApiErrorCode::ValidationFailed
            | ApiErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ApiErrorCode::UserExists => StatusCode::CONFLICT,
            ApiErrorCode::UserNotFound | ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::NoToken => ApiError::new(ApiErrorCode::NoToken),
            AuthError::InvalidToken => ApiError::new(ApiErrorCode::InvalidToken),
            AuthError::ExpiredToken => ApiError::new(ApiErrorCode::ExpiredToken),
            AuthError::InvalidRefreshToken => ApiError::new(ApiErrorCode::InvalidRefreshToken),
            AuthError::ExpiredRefreshToken => ApiError::new(ApiErrorCode::ExpiredRefreshToken),
            AuthError::InvalidCredentials => ApiError::new(ApiErrorCode::InvalidCredentials),
            AuthError::UserExists => ApiError::new(ApiErrorCode::UserExists),
            AuthError::UserNotFound => ApiError::new(ApiErrorCode::UserNotFound),
            AuthError::Validation(msg) => ApiError::with_message(ApiErrorCode::ValidationFailed, msg),
            AuthError::Store(e) => ApiError::internal(format!("store: {e}")),
            AuthError::InternalError(e) => ApiError::internal(e),
        }
    }
}

/// Turn any rejection into `{"error": {"code", "message"}}` with a matching status.
pub async fn recover_error(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    let error = if let Some(e) = err.find::<ApiError>() {
        e.clone()
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        ApiError::with_message(ApiErrorCode::BadRequest, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        ApiError::new(ApiErrorCode::PayloadTooLarge)
    } else if err.find::<warp::reject::LengthRequired>().is_some()
        || err.find::<warp::reject::UnsupportedMediaType>().is_some()
    {
        ApiError::new(ApiErrorCode::BadRequest)
    } else if err.find::<warp::filters::cors::CorsForbidden>().is_some() {
        ApiError::new(ApiErrorCode::Forbidden)
    } else if err.is_not_found() {
        ApiError::new(ApiErrorCode::NotFound)
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        ApiError::new(ApiErrorCode::MethodNotAllowed)
    } else {
        ApiError::internal(format!("unhandled rejection: {err:?}"))
    };

    let status = error.code.status();
    let json = warp::reply::json(&ErrorResponse { error });
    Ok(warp::reply::with_status(json, status))
}
