//! Cookie sessions: login, logout and per-request identity resolution.

use anyhow::Context;
use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use tracing::{debug, error};

use super::{
    identity::{CurrentUser, Identity},
    utils::{generate_session_token, hash_session_token},
};
use crate::api::{
    error::ServiceError,
    state::{AppState, AuthConfig},
    store::StoreError,
};

pub const SESSION_COOKIE_NAME: &str = "agora_session";

/// Start a session for `user` and return the `Set-Cookie` value.
///
/// With `remember`, the cookie outlives the browser session for the remember TTL.
/// Without it, the cookie has no `Max-Age` and the server-side row expires after
/// the regular session TTL.
///
/// # Errors
/// Returns an error if the token cannot be generated or stored.
pub async fn login(
    state: &AppState,
    user: &CurrentUser,
    remember: bool,
) -> Result<HeaderValue, ServiceError> {
    let token = generate_session_token()?;
    let ttl_seconds = if remember {
        state.config().remember_ttl_seconds()
    } else {
        state.config().session_ttl_seconds()
    };
    state
        .store()
        .create_session(&hash_session_token(&token), user.id, ttl_seconds, remember)
        .await?;
    debug!(user_id = user.id, remember, "session created");
    let cookie = session_cookie(state.config(), &token, remember.then_some(ttl_seconds))
        .context("failed to build session cookie")?;
    Ok(cookie)
}

/// End the current session, if any, and return a cookie that clears it.
/// Always clears the cookie, even if the session record was missing.
pub async fn logout(state: &AppState, headers: &HeaderMap) -> Option<HeaderValue> {
    if let Some(token) = read_cookie(headers, SESSION_COOKIE_NAME) {
        let token_hash = hash_session_token(&token);
        if let Err(err) = state.store().delete_session(&token_hash).await {
            error!("Failed to delete session: {err}");
        }
    }
    clear_session_cookie(state.config()).ok()
}

/// Revoke every session of an account.
///
/// # Errors
/// Returns the storage error if the delete fails.
pub async fn logout_everywhere(state: &AppState, user_id: i64) -> Result<u64, StoreError> {
    let removed = state.store().delete_user_sessions(user_id).await?;
    debug!(user_id, removed, "revoked all sessions");
    Ok(removed)
}

/// Resolve the session cookie into an identity with one keyed lookup.
/// Missing, unknown or expired sessions are anonymous.
///
/// # Errors
/// Returns the storage error if the lookup itself fails.
pub async fn current(state: &AppState, headers: &HeaderMap) -> Result<Identity, StoreError> {
    let Some(token) = read_cookie(headers, SESSION_COOKIE_NAME) else {
        return Ok(Identity::Anonymous);
    };
    // Only the hash is stored; never compare raw tokens against the database.
    let token_hash = hash_session_token(&token);
    Ok(state
        .store()
        .lookup_session(&token_hash)
        .await?
        .map_or(Identity::Anonymous, Identity::Authenticated))
}

/// Build an `HttpOnly` cookie for the session token.
pub(crate) fn session_cookie(
    config: &AuthConfig,
    token: &str,
    max_age_seconds: Option<i64>,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax");
    if let Some(max_age) = max_age_seconds {
        cookie.push_str(&format!("; Max-Age={max_age}"));
    }
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Read a cookie by name across every `Cookie` header.
pub(crate) fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name).then(|| val.trim().to_string())
        })
        .find(|val| !val.is_empty())
}
