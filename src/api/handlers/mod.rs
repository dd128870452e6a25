pub mod account;
pub mod admin;
pub mod flash;
pub mod health;
pub mod root;
pub mod settings;

pub use self::flash::Flashes;

// common pieces for the handlers
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::SET_COOKIE, request::Parts, HeaderValue},
    response::{IntoResponse, Json, Redirect, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::error;

use crate::api::{
    auth::{
        identity::{CurrentUser, Identity},
        utils::{valid_email, valid_username},
    },
    error::FormErrors,
};

const EMAIL_MAX_LEN: usize = 64;

/// Page view model: `{ "view": <template>, "flashes": [...], ...context }`.
///
/// Rendering the view drains the flash cookie the request arrived with.
#[derive(Debug)]
pub struct View {
    template: &'static str,
    flashes: Vec<String>,
    drained: bool,
    context: Map<String, Value>,
}

impl View {
    #[must_use]
    pub fn new(template: &'static str, Flashes(flashes): Flashes) -> Self {
        Self {
            template,
            drained: !flashes.is_empty(),
            flashes,
            context: Map::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.context.insert(key.to_string(), value);
        self
    }

    /// Show a message on this render, without a redirect.
    #[must_use]
    pub fn flash(mut self, message: &str) -> Self {
        self.flashes.push(message.to_string());
        self
    }

    #[must_use]
    pub fn errors(self, errors: &FormErrors) -> Self {
        self.with("errors", errors)
    }
}

impl IntoResponse for View {
    fn into_response(self) -> Response {
        let mut body = Map::new();
        body.insert("view".to_string(), Value::from(self.template));
        body.insert("flashes".to_string(), Value::from(self.flashes));
        body.extend(self.context);

        let mut response = Json(Value::Object(body)).into_response();
        if self.drained {
            response
                .headers_mut()
                .append(SET_COOKIE, flash::clear_flash_cookie());
        }
        response
    }
}

/// `303 See Other` with optional cookies and flashed messages for the next page.
#[derive(Debug)]
pub struct SeeOther {
    location: String,
    flashes: Vec<String>,
    cookies: Vec<HeaderValue>,
}

impl SeeOther {
    #[must_use]
    pub fn to(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            flashes: Vec::new(),
            cookies: Vec::new(),
        }
    }

    #[must_use]
    pub fn flash(mut self, message: &str) -> Self {
        self.flashes.push(message.to_string());
        self
    }

    #[must_use]
    pub fn cookie(mut self, cookie: HeaderValue) -> Self {
        self.cookies.push(cookie);
        self
    }
}

impl IntoResponse for SeeOther {
    fn into_response(self) -> Response {
        let mut response = Redirect::to(&self.location).into_response();
        let headers = response.headers_mut();
        for cookie in self.cookies {
            headers.append(SET_COOKIE, cookie);
        }
        if !self.flashes.is_empty() {
            match flash::flash_cookie(&self.flashes) {
                Ok(cookie) => {
                    headers.append(SET_COOKIE, cookie);
                }
                Err(err) => error!("Failed to build flash cookie: {err}"),
            }
        }
        response
    }
}

/// The signed-in account. Anonymous requests are sent to `/login`.
#[derive(Debug, Clone)]
pub struct SignedIn(pub CurrentUser);

#[async_trait]
impl<S> FromRequestParts<S> for SignedIn
where
    S: Send + Sync,
{
    type Rejection = Redirect;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .and_then(Identity::user)
            .cloned()
            .map(Self)
            .ok_or_else(|| Redirect::to("/login"))
    }
}

/// Trimmed text field; missing fields read as empty.
pub(crate) fn text(value: Option<&String>) -> &str {
    value.map_or("", |value| value.trim())
}

/// Password fields are taken verbatim.
pub(crate) fn secret(value: Option<&String>) -> &str {
    value.map_or("", String::as_str)
}

/// HTML checkbox semantics: present and not an explicit "off" value.
pub(crate) fn checked(value: Option<&String>) -> bool {
    value.is_some_and(|value| !matches!(value.trim(), "" | "0" | "false" | "off" | "n"))
}

pub(crate) fn check_email(errors: &mut FormErrors, email: &str) {
    if email.is_empty() {
        errors.add("email", "This field is required.");
    } else if email.len() > EMAIL_MAX_LEN || !valid_email(&email.to_lowercase()) {
        errors.add("email", "Invalid email address.");
    }
}

pub(crate) fn check_username(errors: &mut FormErrors, username: &str) {
    if username.is_empty() {
        errors.add("username", "This field is required.");
    } else if !valid_username(username) {
        errors.add(
            "username",
            "Usernames must have only letters, numbers, dots or underscores.",
        );
    }
}

pub(crate) fn check_new_password(
    errors: &mut FormErrors,
    password: &str,
    confirmation: &str,
) {
    if password.is_empty() {
        errors.add("password", "This field is required.");
    } else if password != confirmation {
        errors.add("password", "Passwords must match.");
    }
}
