//! Administration: topic categories, topics and user accounts.
//!
//! Every route here sits behind the administrator guard.

use axum::{
    extract::{Extension, Multipart, Path, Query},
    response::{IntoResponse, Response},
    Form,
};
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::{IntoParams, ToSchema};

use super::{check_email, check_username, checked, flash, text, Flashes, SeeOther, SignedIn, View};
use crate::api::{
    auth::identity::Role,
    error::{FormErrors, ServiceError},
    state::AppState,
    store::{NewTopic, PageRequest, StoreError, Topic, UserUpdate},
};

const NAME_MAX_LEN: usize = 64;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct PageQuery {
    /// 1-based page number; anything unparsable reads as the first page.
    pub page: Option<String>,
}

impl PageQuery {
    fn page(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|page| page.trim().parse().ok())
            .unwrap_or(1)
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct DeleteCategoryQuery {
    pub cate_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct DeleteTopicQuery {
    pub topic_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CategoryForm {
    pub category_name: Option<String>,
    pub category_desc: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct EditUserForm {
    pub email: Option<String>,
    pub username: Option<String>,
    pub confirmed: Option<String>,
    /// Role id: 1 user, 2 moderator, 3 administrator.
    pub role: Option<String>,
    pub name: Option<String>,
}

/// Topic as listed to the admin, image inlined as base64.
#[derive(Debug, Serialize, ToSchema)]
pub struct TopicRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub category_id: i64,
    pub category_name: String,
    pub image: Option<String>,
}

impl From<Topic> for TopicRow {
    fn from(topic: Topic) -> Self {
        Self {
            id: topic.id,
            name: topic.name,
            description: topic.description,
            category_id: topic.category_id,
            category_name: topic.category_name,
            image: topic.image.map(|bytes| Base64::encode_string(&bytes)),
        }
    }
}

fn role_choices() -> serde_json::Value {
    Role::ASSIGNABLE
        .iter()
        .map(|role| json!({ "id": role.id(), "name": role.name() }))
        .collect()
}

/// Parse a positive id from a query parameter; blank means absent.
fn parse_id(value: Option<&String>) -> Option<Result<i64, ()>> {
    let value = text(value);
    if value.is_empty() {
        return None;
    }
    Some(value.parse::<i64>().map_err(|_| ()))
}

/// Account id from the path. Anything but an integer names no account.
fn path_id(raw: &str) -> Result<i64, ServiceError> {
    raw.trim().parse::<i64>().map_err(|_| ServiceError::NotFound)
}

#[utoipa::path(
    get,
    path = "/admin",
    responses(
        (status = 200, description = "Admin landing view", content_type = "application/json"),
        (status = 403, description = "Not an administrator")
    ),
    tag = "admin",
)]
pub async fn admin_index(flashes: Flashes) -> impl IntoResponse {
    View::new("auth/admin_index.html", flashes)
}

#[utoipa::path(
    get,
    path = "/add/category",
    responses((status = 200, description = "Category form", content_type = "application/json")),
    tag = "admin",
)]
pub async fn add_category_form(flashes: Flashes) -> impl IntoResponse {
    View::new("auth/add_category.html", flashes).errors(&FormErrors::new())
}

#[utoipa::path(
    post,
    path = "/add/category",
    request_body(content = CategoryForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Redirect to the category list"),
        (status = 200, description = "Form re-rendered with errors", content_type = "application/json")
    ),
    tag = "admin",
)]
#[instrument(skip_all)]
pub async fn add_category(
    state: Extension<Arc<AppState>>,
    flashes: Flashes,
    Form(form): Form<CategoryForm>,
) -> Response {
    let name = text(form.category_name.as_ref());
    let description = text(form.category_desc.as_ref());

    let mut errors = FormErrors::new();
    if name.is_empty() {
        errors.add("category_name", "This field is required.");
    } else if name.chars().count() > NAME_MAX_LEN {
        errors.add("category_name", "Field must be at most 64 characters long.");
    }
    if !errors.is_empty() {
        return View::new("auth/add_category.html", flashes)
            .errors(&errors)
            .into_response();
    }

    let redirect = SeeOther::to("/manage/category");
    match state.store().insert_category(name, description).await {
        Ok(category) => {
            info!(category_id = category.id, "category created");
            redirect
        }
        Err(StoreError::DuplicateName) => redirect.flash(flash::ALREADY_EXIST),
        Err(err) => {
            error!("Failed to insert category: {err}");
            redirect.flash(flash::FAIL)
        }
    }
    .into_response()
}

#[utoipa::path(
    get,
    path = "/manage/category",
    params(PageQuery),
    responses((status = 200, description = "One page of categories", content_type = "application/json")),
    tag = "admin",
)]
pub async fn manage_category(
    state: Extension<Arc<AppState>>,
    flashes: Flashes,
    Query(query): Query<PageQuery>,
) -> Result<View, ServiceError> {
    let request = PageRequest::new(query.page(), state.config().admin_page_size());
    let pagination = state.store().list_categories(request).await?;
    Ok(View::new("auth/manage_category.html", flashes)
        .with("endpoint", "/manage/category")
        .with("items", &pagination.items)
        .with("pagination", &pagination))
}

#[utoipa::path(
    get,
    path = "/delete/category",
    params(DeleteCategoryQuery),
    responses((status = 303, description = "Redirect to the category list with the outcome flashed")),
    tag = "admin",
)]
pub async fn delete_category(
    state: Extension<Arc<AppState>>,
    Query(query): Query<DeleteCategoryQuery>,
) -> SeeOther {
    let redirect = SeeOther::to("/manage/category");
    let Some(id) = parse_id(query.cate_id.as_ref()) else {
        return redirect;
    };
    let Ok(id) = id else {
        return redirect.flash(flash::FAIL);
    };
    match state.store().delete_category(id).await {
        Ok(()) => {
            info!(category_id = id, "category deleted");
            redirect.flash(flash::UPDATE_SUCC)
        }
        Err(err) => {
            info!(category_id = id, "category not deleted: {err}");
            redirect.flash(flash::FAIL)
        }
    }
}

async fn topic_form(state: &AppState, flashes: Flashes, errors: &FormErrors) -> Result<View, ServiceError> {
    let categories = state.store().all_categories().await?;
    Ok(View::new("auth/add_topic.html", flashes)
        .with("categories", categories)
        .errors(errors))
}

#[utoipa::path(
    get,
    path = "/add/topic",
    responses((status = 200, description = "Topic form with the category choices", content_type = "application/json")),
    tag = "admin",
)]
pub async fn add_topic_form(
    state: Extension<Arc<AppState>>,
    flashes: Flashes,
) -> Result<View, ServiceError> {
    topic_form(&state, flashes, &FormErrors::new()).await
}

/// Fields of the multipart topic form.
#[derive(Debug, Default)]
struct TopicUpload {
    name: String,
    description: String,
    category: String,
    image: Option<Vec<u8>>,
}

async fn read_topic_upload(mut multipart: Multipart) -> Result<TopicUpload, FormErrors> {
    let unreadable = |err: axum::extract::multipart::MultipartError| {
        let mut errors = FormErrors::new();
        errors.add("file", format!("The upload could not be read: {err}"));
        errors
    };

    let mut upload = TopicUpload::default();
    while let Some(field) = multipart.next_field().await.map_err(unreadable)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "topic_name" => upload.name = field.text().await.map_err(unreadable)?.trim().to_string(),
            "topic_desc" => {
                upload.description = field.text().await.map_err(unreadable)?.trim().to_string();
            }
            "topic_cate" => {
                upload.category = field.text().await.map_err(unreadable)?.trim().to_string();
            }
            "file" => {
                let bytes = field.bytes().await.map_err(unreadable)?;
                upload.image = (!bytes.is_empty()).then(|| bytes.to_vec());
            }
            _ => {}
        }
    }
    Ok(upload)
}

#[utoipa::path(
    post,
    path = "/add/topic",
    request_body(content_type = "multipart/form-data", description = "topic_name, topic_desc, topic_cate and an optional image in file"),
    responses(
        (status = 303, description = "Redirect to the topic list"),
        (status = 200, description = "Form re-rendered with errors", content_type = "application/json")
    ),
    tag = "admin",
)]
#[instrument(skip_all)]
pub async fn add_topic(
    state: Extension<Arc<AppState>>,
    flashes: Flashes,
    multipart: Multipart,
) -> Result<Response, ServiceError> {
    let upload = match read_topic_upload(multipart).await {
        Ok(upload) => upload,
        Err(errors) => return Ok(topic_form(&state, flashes, &errors).await?.into_response()),
    };

    let mut errors = FormErrors::new();
    if upload.name.is_empty() {
        errors.add("topic_name", "This field is required.");
    } else if upload.name.chars().count() > NAME_MAX_LEN {
        errors.add("topic_name", "Field must be at most 64 characters long.");
    }
    let category_id = upload.category.parse::<i64>().ok();
    if category_id.is_none() {
        errors.add("topic_cate", "Not a valid choice.");
    }
    let Some(category_id) = category_id.filter(|_| errors.is_empty()) else {
        return Ok(topic_form(&state, flashes, &errors).await?.into_response());
    };

    let redirect = SeeOther::to("/manage/topic");
    let topic = NewTopic {
        name: upload.name,
        description: upload.description,
        image: upload.image,
        category_id,
    };
    Ok(match state.store().insert_topic(topic).await {
        Ok(topic) => {
            info!(topic_id = topic.id, "topic created");
            redirect.into_response()
        }
        Err(StoreError::DuplicateName) => redirect.flash(flash::ALREADY_EXIST).into_response(),
        Err(StoreError::Referenced) => {
            errors.add("topic_cate", "Not a valid choice.");
            topic_form(&state, flashes, &errors).await?.into_response()
        }
        Err(err) => {
            error!("Failed to insert topic: {err}");
            redirect.flash(flash::FAIL).into_response()
        }
    })
}

#[utoipa::path(
    get,
    path = "/manage/topic",
    params(PageQuery),
    responses((status = 200, description = "One page of topics", content_type = "application/json")),
    tag = "admin",
)]
pub async fn manage_topic(
    state: Extension<Arc<AppState>>,
    flashes: Flashes,
    Query(query): Query<PageQuery>,
) -> Result<View, ServiceError> {
    let request = PageRequest::new(query.page(), state.config().admin_page_size());
    let pagination = state.store().list_topics(request).await?.map(TopicRow::from);
    Ok(View::new("auth/manage_topic.html", flashes)
        .with("endpoint", "/manage/topic")
        .with("items", &pagination.items)
        .with("pagination", &pagination))
}

#[utoipa::path(
    get,
    path = "/delete/topic",
    params(DeleteTopicQuery),
    responses((status = 303, description = "Redirect to the topic list with the outcome flashed")),
    tag = "admin",
)]
pub async fn delete_topic(
    state: Extension<Arc<AppState>>,
    Query(query): Query<DeleteTopicQuery>,
) -> SeeOther {
    let redirect = SeeOther::to("/manage/topic");
    let Some(id) = parse_id(query.topic_id.as_ref()) else {
        return redirect;
    };
    let Ok(id) = id else {
        return redirect.flash(flash::FAIL);
    };
    match state.store().delete_topic(id).await {
        Ok(()) => {
            info!(topic_id = id, "topic deleted");
            redirect.flash(flash::UPDATE_SUCC)
        }
        Err(err) => {
            info!(topic_id = id, "topic not deleted: {err}");
            redirect.flash(flash::FAIL)
        }
    }
}

#[utoipa::path(
    get,
    path = "/manage/users",
    responses((status = 200, description = "Every account except the acting administrator", content_type = "application/json")),
    tag = "admin",
)]
pub async fn manage_users(
    state: Extension<Arc<AppState>>,
    SignedIn(admin): SignedIn,
    flashes: Flashes,
) -> Result<View, ServiceError> {
    let users = state.store().list_users_except(admin.id).await?;
    Ok(View::new("auth/manage_users.html", flashes).with("users", users))
}

fn edit_user_page(
    flashes: Flashes,
    id: i64,
    form: &serde_json::Value,
    errors: &FormErrors,
) -> View {
    View::new("auth/admin_edit_profile.html", flashes)
        .with("user_id", id)
        .with("form", form)
        .with("roles", role_choices())
        .errors(errors)
}

#[utoipa::path(
    get,
    path = "/setting_users/{id}",
    params(("id" = i64, Path, description = "Account id")),
    responses(
        (status = 200, description = "Edit form filled with the account", content_type = "application/json"),
        (status = 404, description = "No such account")
    ),
    tag = "admin",
)]
pub async fn edit_user_form(
    state: Extension<Arc<AppState>>,
    flashes: Flashes,
    Path(id): Path<String>,
) -> Result<View, ServiceError> {
    let id = path_id(&id)?;
    let record = state
        .store()
        .find_user_by_id(id)
        .await?
        .ok_or(ServiceError::NotFound)?;
    let user = record.user;
    let form = json!({
        "email": user.email,
        "username": user.username,
        "confirmed": user.confirmed,
        "role": user.role.id(),
        "name": user.name,
    });
    Ok(edit_user_page(flashes, id, &form, &FormErrors::new()))
}

#[utoipa::path(
    post,
    path = "/setting_users/{id}",
    params(("id" = i64, Path, description = "Account id")),
    request_body(content = EditUserForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Account updated, redirect back to the form"),
        (status = 200, description = "Form re-rendered with errors", content_type = "application/json"),
        (status = 404, description = "No such account")
    ),
    tag = "admin",
)]
#[instrument(skip_all)]
pub async fn edit_user(
    state: Extension<Arc<AppState>>,
    flashes: Flashes,
    Path(id): Path<String>,
    Form(form): Form<EditUserForm>,
) -> Result<Response, ServiceError> {
    let id = path_id(&id)?;
    if state.store().find_user_by_id(id).await?.is_none() {
        return Err(ServiceError::NotFound);
    }

    let email = text(form.email.as_ref()).to_lowercase();
    let username = text(form.username.as_ref());
    let name = text(form.name.as_ref());
    let confirmed = checked(form.confirmed.as_ref());
    let role = text(form.role.as_ref()).parse::<i16>().ok().and_then(Role::from_id);

    let mut errors = FormErrors::new();
    check_email(&mut errors, &email);
    check_username(&mut errors, username);
    if name.chars().count() > NAME_MAX_LEN {
        errors.add("name", "Field must be at most 64 characters long.");
    }
    if role.is_none() {
        errors.add("role", "Not a valid choice.");
    }

    let echo = json!({
        "email": email,
        "username": username,
        "confirmed": confirmed,
        "role": text(form.role.as_ref()),
        "name": name,
    });
    let Some(role) = role.filter(|_| errors.is_empty()) else {
        return Ok(edit_user_page(flashes, id, &echo, &errors).into_response());
    };

    let update = UserUpdate {
        email: email.clone(),
        username: username.to_string(),
        name: name.to_string(),
        confirmed,
        role,
    };
    match state.store().update_user(id, update).await {
        Ok(user) => {
            info!(user_id = user.id, role = user.role.name(), "account updated by admin");
            Ok(SeeOther::to(format!("/setting_users/{id}"))
                .flash(flash::PROFILE_UPDATE)
                .into_response())
        }
        Err(StoreError::DuplicateEmail) => {
            errors.add("email", "Email already registered.");
            Ok(edit_user_page(flashes, id, &echo, &errors).into_response())
        }
        Err(StoreError::DuplicateUsername) => {
            errors.add("username", "Username already in use.");
            Ok(edit_user_page(flashes, id, &echo, &errors).into_response())
        }
        Err(err) => Err(err.into()),
    }
}
