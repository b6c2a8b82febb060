//! REST Surface: the axum router and shared application state.
//!
//! Grounded on `mhismail3-tron`'s `tron-server::server` module — the
//! `AppState`/`build_router`/`ServerHandle` shape is carried over wholesale,
//! generalized from a WebSocket+RPC server to a plain JSON REST service.
//! Route handlers themselves follow `original_source/apis/users.py` and
//! `apis/sessions.py`, translating their Flask-RESTful resources one for
//! one.

mod sessions;
mod users;

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::authdb::AuthDb;
use users::KeyQuery;

/// Everything a handler needs, shared behind `Arc` clones via axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub authdb: Arc<AuthDb>,
}

/// Request timeout applied uniformly to every route.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/users", post(users::create_user))
        .route("/users/:user_at_org", get(users::get_user))
        .route(
            "/users/:user_at_org/requestpasswordreset",
            post(users::request_password_reset),
        )
        .route(
            "/users/:user_at_org/completepasswordreset",
            post(users::complete_password_reset),
        )
        .route(
            "/sessions/:user_at_org",
            post(sessions::create_session).get(sessions::list_sessions),
        )
        .route(
            "/sessions/:user_at_org/:sessionid",
            get(sessions::get_session),
        )
        .route("/health", get(health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
}

async fn health() -> &'static str {
    "ok"
}

/// Bind and serve `state`'s router on `addr` until `cancel` fires.
pub async fn serve(
    state: AppState,
    addr: &str,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
}

/// Split `"user@org"` into `(user, org)`. Both original Flask resources and
/// `spec.md` §6 use this composite path segment for every user-scoped
/// route.
pub(crate) fn split_user_at_org(path_segment: &str) -> Option<(String, String)> {
    let (user, org) = path_segment.split_once('@')?;
    if user.is_empty() || org.is_empty() {
        return None;
    }
    Some((user.to_string(), org.to_string()))
}

/// Look up a caller-supplied session key, preferring the `key` header over
/// the `key` query parameter, matching the original's
/// `location=['headers', 'form', 'args']` parser precedence.
pub(crate) fn session_key_from(headers: &HeaderMap, query: &KeyQuery) -> Option<String> {
    headers
        .get("key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| query.key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_well_formed_segment() {
        assert_eq!(
            split_user_at_org("alice@example.net"),
            Some(("alice".to_string(), "example.net".to_string()))
        );
    }

    #[test]
    fn rejects_missing_at_sign() {
        assert_eq!(split_user_at_org("alice"), None);
    }

    #[test]
    fn rejects_empty_user_or_org() {
        assert_eq!(split_user_at_org("@example.net"), None);
        assert_eq!(split_user_at_org("alice@"), None);
    }
}
