use super::error::*;
use super::handler;
use crate::application_port::{AuthService, Identity};
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, reject};

pub const AUTH_HEADER: &str = "x-auth-token";
const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Routes under `/api`. Paths are matched before methods so an unknown path
/// reports 404 rather than 405.
pub fn routes(
    auth_service: Arc<dyn AuthService>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let register = warp::path("users")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(with(auth_service.clone()))
        .and_then(handler::register);

    let change_password = warp::path!("users" / "password")
        .and(warp::put())
        .and(json_body())
        .and(with_identity(auth_service.clone()))
        .and(with(auth_service.clone()))
        .and_then(handler::change_password);

    let login = warp::path("auth")
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(with(auth_service.clone()))
        .and_then(handler::login);

    let current_user = warp::path("auth")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_identity(auth_service.clone()))
        .and(with(auth_service.clone()))
        .and_then(handler::current_user);

    let refresh = warp::path!("auth" / "refresh")
        .and(warp::post())
        .and(json_body())
        .and(with(auth_service.clone()))
        .and_then(handler::refresh);

    let logout = warp::path!("auth" / "logout")
        .and(warp::post())
        .and(json_body())
        .and(with_identity(auth_service.clone()))
        .and(with(auth_service.clone()))
        .and_then(handler::logout);

    register
        .or(change_password)
        .or(login)
        .or(current_user)
        .or(refresh)
        .or(logout)
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}

/// Resolve the caller from the `x-auth-token` header. A missing header still
/// reaches the service so it can answer `NoToken`.
fn with_identity(
    auth_service: Arc<dyn AuthService>,
) -> impl Filter<Extract = (Identity,), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>(AUTH_HEADER).and_then(move |token: Option<String>| {
        let auth_service = auth_service.clone();
        async move {
            auth_service
                .authenticate(token.as_deref())
                .await
                .map_err(ApiError::from)
                .map_err(reject::custom)
        }
    })
}
