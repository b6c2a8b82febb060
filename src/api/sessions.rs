//! `/sessions*` routes. `create_session` translates
//! `original_source/apis/sessions.py`'s `Sessions.post` one for one;
//! `list_sessions`/`get_session` are designed fresh per `spec.md` §6 (the
//! retrieved `original_source` slice ends before any session-listing
//! resource), reusing the same `key`-header authorization pattern as
//! `Users.post`.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use super::users::KeyQuery;
use super::{session_key_from, split_user_at_org, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub password: String,
}

/// `POST /sessions/<u>@<o>`.
pub async fn create_session(
    State(state): State<AppState>,
    Path(user_at_org): Path<String>,
    Json(body): Json<CreateSessionRequest>,
) -> (StatusCode, Json<Value>) {
    let Some((username, org)) = split_user_at_org(&user_at_org) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "malformed user@org path segment" })),
        );
    };

    let exists = match state.authdb.user_exists(&org, &username).await {
        Ok(v) => v,
        Err(e) => return server_error("Sessions.post", &e),
    };
    if !exists {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": format!(
                "Cannot open session for invalid user \"{username}@{org}\"."
            ) })),
        );
    }

    let password_ok = match state.authdb.validate_password(&org, &username, &body.password).await {
        Ok(v) => v,
        Err(e) => return server_error("Sessions.post", &e),
    };
    if !password_ok {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": format!(
                "Password authentication failed for \"{username}@{org}\"."
            ) })),
        );
    }

    let sessionid = match state.authdb.create_user_session(&org, &username).await {
        Ok(id) => id,
        Err(e) => return server_error("Sessions.post", &e),
    };
    let key = match state
        .authdb
        .create_user_session_key(&org, &username, sessionid)
        .await
    {
        Ok(k) => k,
        Err(e) => return server_error("Sessions.post", &e),
    };

    (
        StatusCode::OK,
        Json(json!({ "message": "Session created", "id": sessionid.to_string(), "key": key })),
    )
}

#[derive(Debug, Serialize)]
struct SessionSummary {
    sessionid: String,
    startdate: String,
    lastupdate: String,
}

/// `GET /sessions/<u>@<o>`. Requires a `key` belonging to `username@org`
/// itself; any other valid key (e.g. another user's) is rejected with 403,
/// matching the authorization model `spec.md` §8's "Session authorization"
/// property exercises.
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(user_at_org): Path<String>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
) -> (StatusCode, Json<Value>) {
    let Some((username, org)) = split_user_at_org(&user_at_org) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "malformed user@org path segment" })),
        );
    };

    let Some(key) = session_key_from(&headers, &query) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "a valid session key is required" })),
        );
    };

    let (valid, key_user, key_org) = match state.authdb.validate_session_key(&key).await {
        Ok(v) => v,
        Err(e) => return server_error("Sessions.get", &e),
    };
    if !valid {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "invalid or expired session key" })),
        );
    }
    if key_user != username || key_org != org {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "message": "session key does not belong to this user" })),
        );
    }

    match state.authdb.get_user_sessions(&org, &username).await {
        Ok(sessions) => (
            StatusCode::OK,
            Json(json!({
                "message": "ok",
                "sessions": sessions
                    .into_iter()
                    .map(|s| SessionSummary {
                        sessionid: s.sessionid.to_string(),
                        startdate: s.startdate.to_string(),
                        lastupdate: s.lastupdate.to_string(),
                    })
                    .collect::<Vec<_>>(),
            })),
        ),
        Err(e) => server_error("Sessions.get", &e),
    }
}

/// `GET /sessions/<u>@<o>/<sid>`.
pub async fn get_session(
    State(state): State<AppState>,
    Path((user_at_org, sessionid)): Path<(String, String)>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
) -> (StatusCode, Json<Value>) {
    let Some((username, org)) = split_user_at_org(&user_at_org) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "malformed user@org path segment" })),
        );
    };
    let Ok(sessionid) = Uuid::parse_str(&sessionid) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "no such session" })),
        );
    };

    let Some(key) = session_key_from(&headers, &query) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "a valid session key is required" })),
        );
    };

    let (valid, key_user, key_org) = match state.authdb.validate_session_key(&key).await {
        Ok(v) => v,
        Err(e) => return server_error("Session.get", &e),
    };
    if !valid {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "invalid or expired session key" })),
        );
    }
    if key_user != username || key_org != org {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "message": "session key does not belong to this user" })),
        );
    }

    match state.authdb.get_user_session(&org, &username, sessionid).await {
        Ok(Some(s)) => (
            StatusCode::OK,
            Json(json!({
                "message": "ok",
                "session": SessionSummary {
                    sessionid: s.sessionid.to_string(),
                    startdate: s.startdate.to_string(),
                    lastupdate: s.lastupdate.to_string(),
                },
            })),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "no such session" })),
        ),
        Err(e) => server_error("Session.get", &e),
    }
}

fn server_error(site: &str, e: &crate::error::Error) -> (StatusCode, Json<Value>) {
    error!(site, error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": "There was an error fulfiling your request" })),
    )
}
