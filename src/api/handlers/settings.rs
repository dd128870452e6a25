//! Self-service account settings: email and password.

use axum::{
    extract::{Extension, Path},
    response::{IntoResponse, Response},
    Form,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, instrument};
use utoipa::ToSchema;

use super::{check_email, check_new_password, flash, secret, text, Flashes, SeeOther, SignedIn, View};
use crate::api::{
    auth::{identity::CurrentUser, service, session},
    error::{FormErrors, ServiceError},
    state::AppState,
};

const PROFILE_VIEW: &str = "email_settings.html";
const PASSWORD_VIEW: &str = "password_settings.html";

#[derive(ToSchema, Deserialize, Default)]
pub struct ChangeEmailForm {
    pub email: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for ChangeEmailForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeEmailForm")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(ToSchema, Deserialize, Default)]
pub struct ChangePasswordForm {
    pub oldpassword: Option<String>,
    pub password: Option<String>,
    pub password2: Option<String>,
}

impl std::fmt::Debug for ChangePasswordForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangePasswordForm").finish_non_exhaustive()
    }
}

fn profile_page(flashes: Flashes, user: &CurrentUser, email: &str, errors: &FormErrors) -> View {
    View::new(PROFILE_VIEW, flashes)
        .with("user", user)
        .with("form", serde_json::json!({ "email": email }))
        .errors(errors)
}

fn password_page(flashes: Flashes, user: &CurrentUser, errors: &FormErrors) -> View {
    View::new(PASSWORD_VIEW, flashes)
        .with("user", user)
        .errors(errors)
}

#[utoipa::path(
    get,
    path = "/settings",
    responses((status = 303, description = "Redirect to the profile settings")),
    tag = "settings",
)]
pub async fn settings() -> SeeOther {
    SeeOther::to("/settings/profile")
}

#[utoipa::path(
    get,
    path = "/settings/profile",
    responses((status = 200, description = "Email settings form", content_type = "application/json")),
    tag = "settings",
)]
pub async fn profile(SignedIn(user): SignedIn, flashes: Flashes) -> impl IntoResponse {
    profile_page(flashes, &user, "", &FormErrors::new())
}

#[utoipa::path(
    post,
    path = "/settings/profile",
    request_body(content = ChangeEmailForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Change-email link sent to the new address"),
        (status = 200, description = "Form re-rendered with errors", content_type = "application/json")
    ),
    tag = "settings",
)]
#[instrument(skip_all)]
pub async fn update_profile(
    state: Extension<Arc<AppState>>,
    SignedIn(user): SignedIn,
    flashes: Flashes,
    Form(form): Form<ChangeEmailForm>,
) -> Result<Response, ServiceError> {
    let email = text(form.email.as_ref());
    let password = secret(form.password.as_ref());

    let mut errors = FormErrors::new();
    check_email(&mut errors, email);
    if password.is_empty() {
        errors.add("password", "This field is required.");
    }
    if !errors.is_empty() {
        return Ok(profile_page(flashes, &user, email, &errors).into_response());
    }

    if !service::verify_password(&state, user.id, password).await? {
        return Ok(profile_page(flashes, &user, email, &errors)
            .flash(flash::WRONG_PWD)
            .into_response());
    }

    match service::request_email_change(&state, &user, email).await {
        Ok(()) => Ok(SeeOther::to("/settings/profile")
            .flash(flash::SEND_EMAIL)
            .into_response()),
        Err(ServiceError::EmailInUse) => {
            errors.add("email", "Email already registered.");
            Ok(profile_page(flashes, &user, email, &errors).into_response())
        }
        Err(ServiceError::TransientSendFailure) => Ok(SeeOther::to("/settings/profile")
            .flash(flash::FAIL)
            .into_response()),
        Err(err) => Err(err),
    }
}

#[utoipa::path(
    get,
    path = "/change-email/{token}",
    params(("token" = String, Path, description = "Change-email token from the email link")),
    responses((status = 303, description = "Redirect to profile settings with the outcome flashed")),
    tag = "settings",
)]
pub async fn change_email(
    state: Extension<Arc<AppState>>,
    SignedIn(user): SignedIn,
    Path(token): Path<String>,
) -> Result<SeeOther, ServiceError> {
    let redirect = SeeOther::to("/settings/profile");
    match service::change_email(&state, &user, &token).await {
        Ok(_) => Ok(redirect.flash(flash::EMAIL_UPDATE)),
        Err(err @ (ServiceError::Token(_) | ServiceError::EmailInUse)) => {
            debug!(user_id = user.id, "email change rejected: {err}");
            Ok(redirect.flash(flash::UPDATE_FAIL))
        }
        Err(err) => Err(err),
    }
}

#[utoipa::path(
    get,
    path = "/settings/password",
    responses((status = 200, description = "Password settings form", content_type = "application/json")),
    tag = "settings",
)]
pub async fn password(SignedIn(user): SignedIn, flashes: Flashes) -> impl IntoResponse {
    password_page(flashes, &user, &FormErrors::new())
}

#[utoipa::path(
    post,
    path = "/settings/password",
    request_body(content = ChangePasswordForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Password changed, every session ended, redirect to login"),
        (status = 200, description = "Form re-rendered with errors", content_type = "application/json")
    ),
    tag = "settings",
)]
#[instrument(skip_all)]
pub async fn update_password(
    state: Extension<Arc<AppState>>,
    SignedIn(user): SignedIn,
    flashes: Flashes,
    Form(form): Form<ChangePasswordForm>,
) -> Result<Response, ServiceError> {
    let old_password = secret(form.oldpassword.as_ref());
    let new_password = secret(form.password.as_ref());

    let mut errors = FormErrors::new();
    if old_password.is_empty() {
        errors.add("oldpassword", "This field is required.");
    }
    check_new_password(&mut errors, new_password, secret(form.password2.as_ref()));
    if !errors.is_empty() {
        return Ok(password_page(flashes, &user, &errors).into_response());
    }

    if !service::verify_password(&state, user.id, old_password).await? {
        return Ok(password_page(flashes, &user, &errors)
            .flash(flash::WRONG_PWD)
            .into_response());
    }

    match service::change_password(&state, user.id, new_password).await {
        Ok(()) => {
            let redirect = SeeOther::to("/login").flash(flash::UPDATE_SUCC);
            Ok(match session::clear_session_cookie(state.config()) {
                Ok(cookie) => redirect.cookie(cookie),
                Err(_) => redirect,
            }
            .into_response())
        }
        Err(err) => {
            error!(user_id = user.id, "Failed to change password: {err}");
            Ok(password_page(flashes, &user, &errors)
                .flash(flash::UPDATE_FAIL)
                .into_response())
        }
    }
}
