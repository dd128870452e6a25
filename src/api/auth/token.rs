//! Signed, expiring tokens for confirmation and email-change links.
//!
//! Format: `base64url(json(claims)) "." base64url(hmac_sha256(secret, first_part))`.
//! Tokens are never persisted. Verification order is fixed: shape, signature,
//! claims decoding, expiry, then intent.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_CONFIRM_TTL_SECONDS: i64 = 24 * 60 * 60;
pub const DEFAULT_EMAIL_CHANGE_TTL_SECONDS: i64 = 60 * 60;

/// What a token authorizes. A token minted for one intent never verifies for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    Confirm,
    ChangeEmail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub uid: i64,
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_email: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
    #[error("token malformed")]
    Malformed,
}

pub struct TokenService {
    secret: SecretString,
    confirm_ttl_seconds: i64,
    email_change_ttl_seconds: i64,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("confirm_ttl_seconds", &self.confirm_ttl_seconds)
            .field("email_change_ttl_seconds", &self.email_change_ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            confirm_ttl_seconds: DEFAULT_CONFIRM_TTL_SECONDS,
            email_change_ttl_seconds: DEFAULT_EMAIL_CHANGE_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_confirm_ttl_seconds(mut self, seconds: i64) -> Self {
        self.confirm_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_email_change_ttl_seconds(mut self, seconds: i64) -> Self {
        self.email_change_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn ttl_seconds(&self, intent: Intent) -> i64 {
        match intent {
            Intent::Confirm => self.confirm_ttl_seconds,
            Intent::ChangeEmail => self.email_change_ttl_seconds,
        }
    }

    /// Issue a token for `uid` valid for the configured duration of `intent`.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be serialized.
    pub fn issue(&self, uid: i64, intent: Intent, new_email: Option<String>) -> Result<String> {
        self.issue_at(uid, intent, new_email, unix_now())
    }

    /// Issue a token as if the current time were `now` (unix seconds).
    ///
    /// # Errors
    /// Returns an error if the claims cannot be serialized.
    pub fn issue_at(
        &self,
        uid: i64,
        intent: Intent,
        new_email: Option<String>,
        now: i64,
    ) -> Result<String> {
        let claims = TokenClaims {
            uid,
            intent,
            new_email,
            iat: now,
            exp: now.saturating_add(self.ttl_seconds(intent)),
        };
        let json = serde_json::to_vec(&claims).context("failed to serialize token claims")?;
        let payload = Base64UrlUnpadded::encode_string(&json);
        let signature = Base64UrlUnpadded::encode_string(&self.sign(payload.as_bytes())?);
        Ok(format!("{payload}.{signature}"))
    }

    /// Verify `token` against the expected intent and return its claims.
    ///
    /// # Errors
    /// `Malformed` for undecodable input, `Invalid` for a bad signature or intent
    /// mismatch, `Expired` for an authentic token past its expiry.
    pub fn verify(&self, token: &str, expected: Intent) -> Result<TokenClaims, TokenError> {
        self.verify_at(token, expected, unix_now())
    }

    /// Verify `token` as if the current time were `now` (unix seconds).
    ///
    /// # Errors
    /// See [`TokenService::verify`].
    pub fn verify_at(
        &self,
        token: &str,
        expected: Intent,
        now: i64,
    ) -> Result<TokenClaims, TokenError> {
        let (payload, signature) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        if payload.is_empty() || signature.is_empty() || signature.contains('.') {
            return Err(TokenError::Malformed);
        }

        let signature =
            Base64UrlUnpadded::decode_vec(signature).map_err(|_| TokenError::Malformed)?;
        let json = Base64UrlUnpadded::decode_vec(payload).map_err(|_| TokenError::Malformed)?;

        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| TokenError::Invalid)?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::Invalid)?;

        let claims: TokenClaims =
            serde_json::from_slice(&json).map_err(|_| TokenError::Malformed)?;

        if now >= claims.exp {
            return Err(TokenError::Expired);
        }

        if claims.intent != expected {
            return Err(TokenError::Invalid);
        }

        Ok(claims)
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .context("failed to initialize token signer")?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Current time in unix seconds; clamps to zero if the clock is before the epoch.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}
