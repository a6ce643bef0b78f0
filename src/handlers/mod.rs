pub mod health;
pub mod stats;

use axum::http::HeaderMap;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::services::scheduler::Scheduler;

pub fn router(scheduler: Scheduler) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/scheduler/stats", get(stats::get_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(scheduler)
}

pub(crate) fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if expected_token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn test_check_auth_accepts_matching_bearer() {
        assert!(check_auth(&headers("Bearer secret"), "secret").is_ok());
    }

    #[test]
    fn test_check_auth_rejects_bad_or_missing_token() {
        assert!(check_auth(&headers("Bearer nope"), "secret").is_err());
        assert!(check_auth(&headers("secret"), "secret").is_err());
        assert!(check_auth(&HeaderMap::new(), "secret").is_err());
    }

    #[test]
    fn test_check_auth_rejects_when_no_token_configured() {
        assert!(check_auth(&headers("Bearer "), "").is_err());
    }
}
