use axum::{extract::Extension, response::IntoResponse};

use super::{Flashes, View};
use crate::api::auth::identity::Identity;

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Index view model", content_type = "application/json")),
    tag = "pages",
)]
pub async fn root(Extension(identity): Extension<Identity>, flashes: Flashes) -> impl IntoResponse {
    View::new("index.html", flashes).with("current_user", identity.user())
}
