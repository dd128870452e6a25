use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::{HeaderName, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Extension, Router,
};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub mod auth;
pub mod email;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod state;
pub mod store;

use self::{
    auth::policy,
    email::EmailSender,
    handlers::{account, admin, health, root, settings},
    state::{AppState, AuthConfig},
    store::PgStore,
};

/// Largest accepted request body; topic images ride in multipart forms.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Build the application router over `state`.
///
/// Layers run outermost first: the shared state, then session resolution, then
/// the unconfirmed-account gate. Route groups add their own login or role guard.
pub fn router(state: Arc<AppState>) -> Router {
    let signed_in = Router::new()
        .route("/logout", get(account::logout))
        .route("/confirm", get(account::resend_confirmation))
        .route("/confirm/:token", get(account::confirm))
        .route("/settings", get(settings::settings).post(settings::settings))
        .route(
            "/settings/profile",
            get(settings::profile).post(settings::update_profile),
        )
        .route("/change-email/:token", get(settings::change_email))
        .route(
            "/settings/password",
            get(settings::password).post(settings::update_password),
        )
        .route_layer(from_fn(policy::login_required));

    let administration = Router::new()
        .route("/admin", get(admin::admin_index).post(admin::admin_index))
        .route(
            "/add/category",
            get(admin::add_category_form).post(admin::add_category),
        )
        .route("/add/topic", get(admin::add_topic_form).post(admin::add_topic))
        .route("/manage/category", get(admin::manage_category))
        .route("/manage/topic", get(admin::manage_topic))
        .route("/manage/users", get(admin::manage_users))
        .route("/delete/category", get(admin::delete_category))
        .route("/delete/topic", get(admin::delete_topic))
        .route(
            "/setting_users/:id",
            get(admin::edit_user_form).post(admin::edit_user),
        )
        .route_layer(from_fn(policy::admin_required));

    Router::new()
        .route("/", get(root::root))
        .route("/health", get(health::health).options(health::health))
        .route("/openapi.json", get(openapi::openapi_json))
        .route("/login", get(account::login).post(account::login_submit))
        .route("/unconfirmed", get(account::unconfirmed))
        .merge(signed_in)
        .merge(administration)
        .layer(from_fn(policy::confirmed_gate))
        .layer(from_fn_with_state(state.clone(), policy::resolve_identity))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(Extension(state))
}

/// Connect the database, apply the schema and serve until the process stops.
///
/// # Errors
/// Returns an error if the database is unreachable, the schema cannot be
/// applied, or the server fails to start.
pub async fn new(
    port: u16,
    dsn: String,
    config: AuthConfig,
    secret: SecretString,
    mailer: Arc<dyn EmailSender>,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let store = PgStore::new(pool);
    store.migrate().await.context("Failed to apply schema")?;

    let state = Arc::new(AppState::new(config, secret, Arc::new(store), mailer));
    info!(?state, "application state ready");

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    info_span!(
        "http-request",
        http.method = %request.method(),
        http.route = path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        auth::password::PasswordHasher, email::LogEmailSender, store::MemoryStore,
    };
    use axum::http::StatusCode;
    use tower::ServiceExt;

    fn app() -> anyhow::Result<Router> {
        let state = AppState::new(
            AuthConfig::new("http://localhost:8080".to_string()),
            SecretString::from("router-test-secret"),
            Arc::new(MemoryStore::new()),
            Arc::new(LogEmailSender),
        )
        .with_password_hasher(PasswordHasher::with_params(1024, 1, 1)?);
        Ok(router(Arc::new(state)))
    }

    #[tokio::test]
    async fn health_reports_ok_with_memory_store() -> anyhow::Result<()> {
        let response = app()?
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("X-App"));
        Ok(())
    }

    #[tokio::test]
    async fn options_health_has_empty_body() -> anyhow::Result<()> {
        let response = app()?
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/health")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        assert!(body.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn anonymous_settings_redirects_to_login() -> anyhow::Result<()> {
        let response = app()?
            .oneshot(
                Request::builder()
                    .uri("/settings/profile")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get("location").and_then(|v| v.to_str().ok()),
            Some("/login")
        );
        Ok(())
    }

    #[tokio::test]
    async fn openapi_document_is_served() -> anyhow::Result<()> {
        let response = app()?
            .oneshot(Request::builder().uri("/openapi.json").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }
}
