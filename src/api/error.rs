//! Service error taxonomy and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use super::{auth::token::TokenError, store::StoreError};

/// Per-field validation messages for a submitted form.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct FormErrors(std::collections::BTreeMap<&'static str, Vec<String>>);

impl FormErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_default().push(message.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn field(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    /// `Ok(())` when no field failed.
    ///
    /// # Errors
    /// Returns `ServiceError::Validation` carrying every collected message.
    pub fn into_result(self) -> Result<(), ServiceError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(self))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid form input")]
    Validation(FormErrors),
    #[error("email already registered")]
    DuplicateEmail,
    #[error("username already taken")]
    DuplicateUsername,
    #[error("already exists")]
    AlreadyExists,
    #[error("email address is already in use")]
    EmailInUse,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("email delivery failed")]
    TransientSendFailure,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => Self::DuplicateEmail,
            StoreError::DuplicateUsername => Self::DuplicateUsername,
            StoreError::DuplicateName => Self::AlreadyExists,
            StoreError::NotFound => Self::NotFound,
            StoreError::Referenced => Self::Internal(anyhow::anyhow!("record is still referenced")),
            StoreError::Backend(source) => Self::Internal(source),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, view) = match &self {
            Self::Validation(_)
            | Self::DuplicateEmail
            | Self::DuplicateUsername
            | Self::AlreadyExists
            | Self::EmailInUse
            | Self::Token(_) => (StatusCode::BAD_REQUEST, "errors/400.html"),
            Self::Forbidden => (StatusCode::FORBIDDEN, "errors/403.html"),
            Self::NotFound => (StatusCode::NOT_FOUND, "errors/404.html"),
            Self::TransientSendFailure => (StatusCode::SERVICE_UNAVAILABLE, "errors/503.html"),
            Self::Internal(err) => {
                error!("Internal error: {err:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "errors/500.html")
            }
        };
        // Token failures never reveal whether the token was expired or tampered with.
        let message = match &self {
            Self::Token(_) => "The link is invalid or has expired.".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (
            status,
            Json(json!({ "view": view, "flashes": [], "error": message })),
        )
            .into_response()
    }
}
