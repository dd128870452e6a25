//! One-shot messages carried across a redirect in a short-lived cookie.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::InvalidHeaderValue, request::Parts, HeaderValue},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use std::convert::Infallible;
use tracing::debug;

use crate::api::auth::session::read_cookie;

pub const FLASH_COOKIE_NAME: &str = "agora_flash";

const FLASH_MAX_AGE_SECONDS: u32 = 300;

pub const WRONG: &str = "Invalid email or password.";
pub const SEND_EMAIL: &str = "A confirmation email has been sent to you.";
pub const VERIFI_SUCCESS: &str = "You have confirmed your account. Thanks!";
pub const LINK_FAIL: &str = "The confirmation link is invalid or has expired.";
pub const WRONG_PWD: &str = "Invalid password.";
pub const EMAIL_UPDATE: &str = "Your email address has been updated.";
pub const UPDATE_FAIL: &str = "The update failed.";
pub const UPDATE_SUCC: &str = "Updated successfully.";
pub const FAIL: &str = "The operation failed.";
pub const ALREADY_EXIST: &str = "It already exists.";
pub const PROFILE_UPDATE: &str = "The profile has been updated.";

/// Messages read from the flash cookie of the current request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flashes(pub Vec<String>);

#[async_trait]
impl<S> FromRequestParts<S> for Flashes
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let messages = read_cookie(&parts.headers, FLASH_COOKIE_NAME)
            .map(|value| decode(&value))
            .unwrap_or_default();
        Ok(Self(messages))
    }
}

/// Undecodable cookies are dropped rather than rejected.
pub(crate) fn decode(value: &str) -> Vec<String> {
    let Ok(bytes) = Base64UrlUnpadded::decode_vec(value) else {
        debug!("ignoring undecodable flash cookie");
        return Vec::new();
    };
    serde_json::from_slice(&bytes).unwrap_or_default()
}

pub(crate) fn encode(messages: &[String]) -> String {
    let json = serde_json::to_vec(messages).unwrap_or_default();
    Base64UrlUnpadded::encode_string(&json)
}

pub(crate) fn flash_cookie(messages: &[String]) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{FLASH_COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={FLASH_MAX_AGE_SECONDS}",
        encode(messages)
    ))
}

pub(crate) fn clear_flash_cookie() -> HeaderValue {
    HeaderValue::from_static("agora_flash=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::COOKIE, Request};

    #[test]
    fn encoded_messages_decode_back() {
        let messages = vec![SEND_EMAIL.to_string(), "Ünïcode; with=signs".to_string()];
        assert_eq!(decode(&encode(&messages)), messages);
    }

    #[test]
    fn garbage_cookie_yields_nothing() {
        assert!(decode("%%%not-base64").is_empty());
        assert!(decode(&Base64UrlUnpadded::encode_string(b"{not json")).is_empty());
    }

    #[test]
    fn cookie_is_short_lived_and_http_only() -> anyhow::Result<()> {
        let cookie = flash_cookie(&[FAIL.to_string()])?;
        let cookie = cookie.to_str()?;
        assert!(cookie.starts_with("agora_flash="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=300"));
        Ok(())
    }

    #[tokio::test]
    async fn extractor_reads_cookie() -> anyhow::Result<()> {
        let value = encode(&[UPDATE_SUCC.to_string()]);
        let request = Request::builder()
            .header(COOKIE, format!("{FLASH_COOKIE_NAME}={value}"))
            .body(())?;
        let (mut parts, ()) = request.into_parts();
        let Flashes(messages) = Flashes::from_request_parts(&mut parts, &()).await?;
        assert_eq!(messages, vec![UPDATE_SUCC.to_string()]);
        Ok(())
    }
}
