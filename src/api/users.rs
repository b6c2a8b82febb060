//! `/users*` routes. Translates `original_source/apis/users.py`'s Flask
//! resources (`Users`, `User`, `RequestPasswordReset`,
//! `CompletePasswordReset`) one for one, including the literal ordering of
//! authorization checks in `Users::post`.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

use crate::authdb::WriteOptions;
use crate::credentials;

use super::{session_key_from, split_user_at_org, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub org: String,
    pub email: String,
    #[serde(default)]
    pub parentuser: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    #[serde(default)]
    pub key: Option<String>,
}

/// `POST /users`.
pub async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<KeyQuery>,
    Json(body): Json<CreateUserRequest>,
) -> (StatusCode, Json<Value>) {
    let key = session_key_from(&headers, &query);
    let (parentusername, parentuserorg) = body
        .parentuser
        .as_deref()
        .and_then(split_user_at_org)
        .unwrap_or_default();

    let (session_valid, session_user, session_org) = match &key {
        Some(k) => match state.authdb.validate_session_key(k).await {
            Ok(v) => v,
            Err(e) => return server_error("Users.post", &e),
        },
        None => (false, String::new(), String::new()),
    };

    let exists = match state.authdb.user_exists(&body.org, &body.username).await {
        Ok(v) => v,
        Err(e) => return server_error("Users.post", &e),
    };

    if exists {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "Message": format!(
                "Cannot create user \"{}@{}\", as it already exists.",
                body.username, body.org
            ) })),
        );
    }

    let registration_open = match state.authdb.get_org_setting(&body.org, "registrationOpen").await {
        Ok(v) => crate::authdb::AuthDb::is_registration_open(v.as_deref()),
        Err(e) => return server_error("Users.post", &e),
    };

    if !registration_open {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "Message": format!(
                "Cannot create user \"{}@{}\". Organization is closed for registrations or does not exist.",
                body.username, body.org
            ) })),
        );
    }

    if let Some(parentuser) = &body.parentuser {
        let parent_ok = !parentusername.is_empty()
            && !parentuserorg.is_empty()
            && match state.authdb.user_exists(&parentuserorg, &parentusername).await {
                Ok(v) => v,
                Err(e) => return server_error("Users.post", &e),
            };

        if !parent_ok {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "Message": format!(
                    "Cannot create user \"{}@{}\". Parent user \"{}\" does not exist.",
                    body.username, body.org, parentuser
                ) })),
            );
        }

        if key.is_none() {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "Message": format!(
                    "Cannot create user \"{}@{}\". Must provide valid session key for \"{}\"",
                    body.username, body.org, parentuser
                ) })),
            );
        }

        if !(session_valid && session_user == parentusername && session_org == parentuserorg) {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({ "Message": format!(
                    "Cannot create user \"{}@{}\". Session key not valid for parent user \"{}\".",
                    body.username, body.org, parentuser
                ) })),
            );
        }
    }

    if let Err(e) = state
        .authdb
        .create_user(
            &body.org,
            &body.username,
            &body.email,
            body.parentuser.as_deref(),
            WriteOptions::QUORUM,
        )
        .await
    {
        return server_error("Users.post", &e);
    }

    (
        StatusCode::OK,
        Json(json!({ "Message": format!("User \"{}@{}\" created.", body.username, body.org) })),
    )
}

#[derive(Debug, Serialize)]
struct UserView {
    username: String,
    org: String,
    parentuser: String,
    createdate: String,
}

/// `GET /users/<u>@<o>`.
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_at_org): Path<String>,
) -> (StatusCode, Json<Value>) {
    let Some((username, org)) = split_user_at_org(&user_at_org) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "Message": "malformed user@org path segment" })),
        );
    };

    match state.authdb.get_user(&org, &username).await {
        Ok(Some(user)) => (
            StatusCode::OK,
            Json(
                serde_json::to_value(UserView {
                    username: user.username,
                    org: user.org,
                    parentuser: user.parentuser.unwrap_or_else(|| "None".to_string()),
                    createdate: user.createdate.to_string(),
                })
                .unwrap(),
            ),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "Message": format!("No user matched \"{username}\"@\"{org}\"") })),
        ),
        Err(e) => server_error("User.get", &e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CompletePasswordResetRequest {
    pub resetid: String,
    pub password: String,
}

/// `POST /users/<u>@<o>/requestpasswordreset`.
pub async fn request_password_reset(
    State(state): State<AppState>,
    Path(user_at_org): Path<String>,
) -> (StatusCode, Json<Value>) {
    let Some((username, org)) = split_user_at_org(&user_at_org) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "Message": "malformed user@org path segment" })),
        );
    };

    let exists = match state.authdb.user_exists(&org, &username).await {
        Ok(v) => v,
        Err(e) => return server_error("RequestPasswordReset.post", &e),
    };

    if !exists {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "Message": format!(
                "Cannot reset password for invalid user \"{username}\"@\"{org}\""
            ) })),
        );
    }

    match state.authdb.create_password_reset(&org, &username).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "Message": format!("Password reset for \"{username}\"@\"{org}\"") })),
        ),
        Err(e) => server_error("RequestPasswordReset.post", &e),
    }
}

/// `POST /users/<u>@<o>/completepasswordreset`.
pub async fn complete_password_reset(
    State(state): State<AppState>,
    Path(user_at_org): Path<String>,
    Json(body): Json<CompletePasswordResetRequest>,
) -> (StatusCode, Json<Value>) {
    let Some((username, org)) = split_user_at_org(&user_at_org) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "malformed user@org path segment" })),
        );
    };

    let exists = match state.authdb.user_exists(&org, &username).await {
        Ok(v) => v,
        Err(e) => return server_error("CompletePasswordReset.post", &e),
    };
    if !exists {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": format!(
                "Cannot change password for invalid user \"{username}\"@\"{org}\""
            ) })),
        );
    }

    let valid = match state
        .authdb
        .validate_password_reset(&org, &username, &body.resetid)
        .await
    {
        Ok(v) => v,
        Err(e) => return server_error("CompletePasswordReset.post", &e),
    };
    if !valid {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": format!(
                "Cannot change password for \"{username}\"@\"{org}\". Invalid or expired resetid"
            ) })),
        );
    }

    let salt = credentials::generate_salt();
    let outcome = match credentials::hash_password(&body.password, &salt, credentials::Algorithm::Argon2) {
        Ok(hash) => {
            state
                .authdb
                .set_password(&org, &username, &hash, &salt, WriteOptions::QUORUM)
                .await
        }
        Err(e) => Err(e),
    };

    // The original deletes the reset record in a `finally` clause
    // regardless of whether the hash/set_password step succeeded.
    if let Err(e) = state.authdb.delete_password_reset(&org, &username).await {
        error!(username, org, error = %e, "failed to delete password reset record");
    }

    match outcome {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "message": format!("Password updated for \"{username}\"@\"{org}\".") })),
        ),
        Err(e) => {
            error!(username, org, error = %e, "CompletePasswordReset.post");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": format!(
                    "Error changing password for \"{username}\"@\"{org}\""
                ) })),
            )
        }
    }
}

fn server_error(site: &str, e: &crate::error::Error) -> (StatusCode, Json<Value>) {
    error!(site, error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "ServerError": 500, "Message": "There was an error fulfiling your request" })),
    )
}
