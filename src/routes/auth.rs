use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::services::crypto::verify_password;
use crate::services::state::AppState;

const SESSION_COOKIE: &str = "session";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub username: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let user = {
        let db = state.db()?;
        db.find_user(request.username.trim())?
    };
    let rejected = || ApiError::Unauthorized("Benutzername oder Passwort falsch".to_string());
    let user = user.ok_or_else(rejected)?;

    let password = request.password;
    let hash = user.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| ApiError::Internal(format!("Passwortprüfung: {}", e)))?;
    if !valid {
        tracing::warn!(username = %user.username, "failed login");
        return Err(rejected());
    }

    let token = state.sessions.issue(&user.username)?;
    let lifetime = state.sessions.lifetime_secs();
    let cookie = session_cookie(&token, lifetime, state.config.secure_cookies);
    tracing::info!(username = %user.username, "login");

    let body = LoginResponse {
        token,
        username: user.username,
        expires_in: lifetime,
    };
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

pub async fn logout(State(state): State<AppState>) -> Response {
    let cookie = session_cookie("", 0, state.config.secure_cookies);
    ([(header::SET_COOKIE, cookie)], Json(json!({ "ok": true }))).into_response()
}

pub async fn me(Extension(user): Extension<CurrentUser>) -> Json<serde_json::Value> {
    Json(json!({ "username": user.username }))
}

fn session_cookie(value: &str, max_age: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, value, max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());
    bearer.or_else(|| {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v: &HeaderValue| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
            .map(|(_, value)| value.to_string())
    })
}

/// Lets the request through only with a valid session token (Bearer header or cookie).
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = session_token(request.headers())
        .ok_or_else(|| ApiError::Unauthorized("Anmeldung erforderlich".to_string()))?;
    let claims = state
        .sessions
        .verify(&token)
        .map_err(|_| ApiError::Unauthorized("Sitzung ungültig oder abgelaufen".to_string()))?;
    request.extensions_mut().insert(CurrentUser {
        username: claims.sub,
    });
    Ok(next.run(request).await)
}
