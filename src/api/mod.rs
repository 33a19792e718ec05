pub mod v1;

use crate::application_port::AuthService;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use warp::Filter;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// The complete HTTP surface: `/health`, `/api/...`, CORS, error recovery and
/// access logging. An empty `cors_origins` allows any origin.
pub fn app(
    auth_service: Arc<dyn AuthService>,
    cors_origins: &[String],
) -> impl Filter<Extract = (impl warp::Reply + use<>,), Error = Infallible> + Clone + use<> {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&HealthResponse { status: "ok" }));

    let api = warp::path("api").and(v1::routes(auth_service));

    health
        .or(api)
        .with(cors(cors_origins))
        .recover(v1::recover_error)
        .with(warp::log::custom(access_log))
}

fn cors(origins: &[String]) -> warp::cors::Builder {
    let builder = warp::cors()
        .allow_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allow_headers(vec!["content-type", v1::AUTH_HEADER]);
    if origins.is_empty() {
        builder.allow_any_origin()
    } else {
        builder.allow_origins(origins.iter().map(String::as_str))
    }
}

/// Origins are parsed when the CORS filter is built, so reject bad ones early.
pub fn validate_cors_origins(origins: &[String]) -> anyhow::Result<()> {
    for origin in origins {
        let uri: warp::http::Uri = origin
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid CORS origin {origin:?}: {e}"))?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(anyhow::anyhow!(
                "CORS origin {origin:?} needs a scheme and a host"
            ));
        }
    }
    Ok(())
}

fn access_log(info: warp::log::Info<'_>) {
    tracing::info!(
        target: "mangahub::http",
        method = %info.method(),
        path = info.path(),
        status = info.status().as_u16(),
        elapsed_ms = info.elapsed().as_millis() as u64,
        "request"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_need_scheme_and_host() {
        assert!(validate_cors_origins(&["http://localhost:3000".to_string()]).is_ok());
        assert!(validate_cors_origins(&["localhost".to_string()]).is_err());
        assert!(validate_cors_origins(&[]).is_ok());
    }
}
