//! Login, registration, logout and account confirmation.

use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Form,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

use super::{
    check_email, check_new_password, check_username, checked, flash, secret, text, Flashes,
    SeeOther, SignedIn, View,
};
use crate::api::{
    auth::{
        identity::{AccountState, Identity},
        service::{self, ConfirmOutcome},
        session,
    },
    error::{FormErrors, ServiceError},
    state::AppState,
};

const LOGIN_VIEW: &str = "auth/login.html";

/// Login and registration share one page; `submit` picks the form.
#[derive(ToSchema, Deserialize, Default, Clone)]
pub struct LoginPageForm {
    /// `login` or `register`.
    pub submit: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub remember_me: Option<String>,
    pub username: Option<String>,
    pub password2: Option<String>,
}

impl std::fmt::Debug for LoginPageForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginPageForm")
            .field("submit", &self.submit)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("remember_me", &self.remember_me)
            .finish_non_exhaustive()
    }
}

fn login_page(flashes: Flashes, form: &LoginPageForm, errors: &FormErrors) -> View {
    View::new(LOGIN_VIEW, flashes)
        .with(
            "login_form",
            json!({
                "email": text(form.email.as_ref()),
                "remember_me": checked(form.remember_me.as_ref()),
            }),
        )
        .with(
            "register_form",
            json!({
                "email": text(form.email.as_ref()),
                "username": text(form.username.as_ref()),
            }),
        )
        .errors(errors)
}

#[utoipa::path(
    get,
    path = "/login",
    responses((status = 200, description = "Login and registration forms", content_type = "application/json")),
    tag = "auth",
)]
pub async fn login(flashes: Flashes) -> impl IntoResponse {
    login_page(flashes, &LoginPageForm::default(), &FormErrors::new())
}

#[utoipa::path(
    post,
    path = "/login",
    request_body(content = LoginPageForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Signed in, or registered and sent to confirm"),
        (status = 200, description = "Form re-rendered with errors", content_type = "application/json")
    ),
    tag = "auth",
)]
#[instrument(skip_all)]
pub async fn login_submit(
    state: Extension<Arc<AppState>>,
    flashes: Flashes,
    Form(form): Form<LoginPageForm>,
) -> Result<Response, ServiceError> {
    match form.submit.as_deref().map(str::trim) {
        Some("login") => sign_in(&state, flashes, &form).await,
        Some("register") => sign_up(&state, flashes, &form).await,
        _ => Ok(login_page(flashes, &form, &FormErrors::new()).into_response()),
    }
}

async fn sign_in(
    state: &AppState,
    flashes: Flashes,
    form: &LoginPageForm,
) -> Result<Response, ServiceError> {
    let email = text(form.email.as_ref());
    let password = secret(form.password.as_ref());

    let mut errors = FormErrors::new();
    check_email(&mut errors, email);
    if password.is_empty() {
        errors.add("password", "This field is required.");
    }
    if !errors.is_empty() {
        return Ok(login_page(flashes, form, &errors).into_response());
    }

    match service::authenticate(state, email, password).await? {
        Some(user) => {
            let remember = checked(form.remember_me.as_ref());
            let cookie = session::login(state, &user, remember).await?;
            debug!(user_id = user.id, "signed in");
            Ok(SeeOther::to("/").cookie(cookie).into_response())
        }
        None => Ok(login_page(flashes, form, &errors)
            .flash(flash::WRONG)
            .into_response()),
    }
}

async fn sign_up(
    state: &AppState,
    flashes: Flashes,
    form: &LoginPageForm,
) -> Result<Response, ServiceError> {
    let email = text(form.email.as_ref());
    let username = text(form.username.as_ref());
    let password = secret(form.password.as_ref());

    let mut errors = FormErrors::new();
    check_email(&mut errors, email);
    check_username(&mut errors, username);
    check_new_password(&mut errors, password, secret(form.password2.as_ref()));
    if !errors.is_empty() {
        return Ok(login_page(flashes, form, &errors).into_response());
    }

    match service::register(state, email, username, password).await {
        Ok(registered) => {
            let redirect = SeeOther::to("/login");
            let redirect = if registered.email_sent {
                redirect.flash(flash::SEND_EMAIL)
            } else {
                redirect
            };
            Ok(redirect.into_response())
        }
        Err(ServiceError::DuplicateEmail) => {
            errors.add("email", "Email already registered.");
            Ok(login_page(flashes, form, &errors).into_response())
        }
        Err(ServiceError::DuplicateUsername) => {
            errors.add("username", "Username already in use.");
            Ok(login_page(flashes, form, &errors).into_response())
        }
        Err(err) => Err(err),
    }
}

#[utoipa::path(
    get,
    path = "/logout",
    responses((status = 303, description = "Session ended, redirect to index")),
    tag = "auth",
)]
pub async fn logout(state: Extension<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    let redirect = SeeOther::to("/");
    match session::logout(&state, &headers).await {
        Some(cookie) => redirect.cookie(cookie),
        None => redirect,
    }
}

#[utoipa::path(
    get,
    path = "/confirm/{token}",
    params(("token" = String, Path, description = "Confirmation token from the email link")),
    responses((status = 303, description = "Redirect to index with the outcome flashed")),
    tag = "auth",
)]
pub async fn confirm(
    state: Extension<Arc<AppState>>,
    SignedIn(user): SignedIn,
    Path(token): Path<String>,
) -> Result<SeeOther, ServiceError> {
    let redirect = SeeOther::to("/");
    match service::confirm(&state, &user, &token).await {
        Ok(ConfirmOutcome::Confirmed) => Ok(redirect.flash(flash::VERIFI_SUCCESS)),
        Ok(ConfirmOutcome::AlreadyConfirmed) => Ok(redirect),
        Err(ServiceError::Token(err)) => {
            debug!(user_id = user.id, "confirmation rejected: {err}");
            Ok(redirect.flash(flash::LINK_FAIL))
        }
        Err(err) => Err(err),
    }
}

#[utoipa::path(
    get,
    path = "/unconfirmed",
    responses(
        (status = 200, description = "Reminder to confirm the account", content_type = "application/json"),
        (status = 303, description = "Anonymous or already confirmed, redirect to index")
    ),
    tag = "auth",
)]
pub async fn unconfirmed(
    Extension(identity): Extension<Identity>,
    flashes: Flashes,
) -> Response {
    match (identity.state(), identity.user()) {
        (AccountState::AuthenticatedUnconfirmed, Some(user)) => {
            View::new("auth/unconfirmed.html", flashes)
                .with("user", user)
                .into_response()
        }
        _ => SeeOther::to("/").into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/confirm",
    responses((status = 303, description = "Confirmation email re-sent, redirect to index")),
    tag = "auth",
)]
pub async fn resend_confirmation(
    state: Extension<Arc<AppState>>,
    SignedIn(user): SignedIn,
) -> Result<SeeOther, ServiceError> {
    let redirect = SeeOther::to("/");
    match service::send_confirmation(&state, &user).await {
        Ok(()) => Ok(redirect.flash(flash::SEND_EMAIL)),
        Err(ServiceError::TransientSendFailure) => Ok(redirect.flash(flash::FAIL)),
        Err(err) => Err(err),
    }
}
