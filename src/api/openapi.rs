use axum::response::{IntoResponse, Json};
use utoipa::{
    openapi::{Contact, InfoBuilder, License},
    OpenApi,
};

use crate::api::{
    auth::identity::{CurrentUser, Role},
    handlers::{self, account, admin, health, settings},
    store::Category,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::root::root,
        health::health,
        account::login,
        account::login_submit,
        account::logout,
        account::confirm,
        account::unconfirmed,
        account::resend_confirmation,
        settings::settings,
        settings::profile,
        settings::update_profile,
        settings::change_email,
        settings::password,
        settings::update_password,
        admin::admin_index,
        admin::add_category_form,
        admin::add_category,
        admin::manage_category,
        admin::delete_category,
        admin::add_topic_form,
        admin::add_topic,
        admin::manage_topic,
        admin::delete_topic,
        admin::manage_users,
        admin::edit_user_form,
        admin::edit_user,
    ),
    components(schemas(
        health::Health,
        account::LoginPageForm,
        settings::ChangeEmailForm,
        settings::ChangePasswordForm,
        admin::CategoryForm,
        admin::EditUserForm,
        admin::TopicRow,
        Category,
        CurrentUser,
        Role,
    )),
    tags(
        (name = "auth", description = "Login, registration and account confirmation"),
        (name = "settings", description = "Self-service email and password changes"),
        (name = "admin", description = "Categories, topics and accounts, administrators only"),
        (name = "health", description = "Build info and database reachability"),
        (name = "pages", description = "Public pages"),
    )
)]
pub struct ApiDoc;

/// The `OpenAPI` document with its info block taken from Cargo metadata.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();

    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.contact = cargo_contact();
    info.license = cargo_license();
    doc.info = info;

    doc
}

pub async fn openapi_json() -> impl IntoResponse {
    Json(openapi())
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    if let Some((name, email)) = author.split_once('<') {
        let name = name.trim();
        let email = email.trim_end_matches('>').trim();
        (
            (!name.is_empty()).then_some(name),
            (!email.is_empty()).then_some(email),
        )
    } else {
        let name = author.trim();
        ((!name.is_empty()).then_some(name), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_author_splits_name_and_email() {
        assert_eq!(
            parse_author("Team Agora <team@agora.dev>"),
            (Some("Team Agora"), Some("team@agora.dev"))
        );
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
        assert_eq!(parse_author("<only@mail>"), (None, Some("only@mail")));
    }

    #[test]
    fn document_lists_every_route() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        for path in [
            "/",
            "/health",
            "/login",
            "/confirm/{token}",
            "/settings/profile",
            "/change-email/{token}",
            "/manage/category",
            "/delete/topic",
            "/setting_users/{id}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let login = doc.paths.paths.get("/login");
        assert!(login.is_some_and(|item| item.get.is_some() && item.post.is_some()));
    }
}
