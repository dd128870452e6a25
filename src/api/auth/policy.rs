//! Route access policy.
//!
//! Rules, evaluated in order:
//! 1. A route that needs a login, requested anonymously, redirects to `/login`.
//! 2. An unconfirmed account is sent to `/unconfirmed` from anything except the
//!    login, logout and confirmation routes and static assets.
//! 3. A route with a minimum role answers `403` to lower ranks.
//!
//! [`evaluate`] is pure; the middleware below only applies its decision.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use tracing::error;

use super::{
    identity::{AccountState, Identity, Role},
    session,
};
use crate::api::{error::ServiceError, state::AppState};

/// Paths an unconfirmed account may still reach.
const UNCONFIRMED_ALLOWED: [&str; 4] = ["/login", "/logout", "/confirm", "/unconfirmed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteAccess {
    pub login_required: bool,
    pub min_role: Option<Role>,
}

impl RouteAccess {
    pub const PUBLIC: Self = Self {
        login_required: false,
        min_role: None,
    };

    pub const AUTHENTICATED: Self = Self {
        login_required: true,
        min_role: None,
    };

    #[must_use]
    pub const fn role(role: Role) -> Self {
        Self {
            login_required: true,
            min_role: Some(role),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectLogin,
    RedirectUnconfirmed,
    Forbidden,
}

/// Whether an unconfirmed account may reach `path`.
#[must_use]
pub fn unconfirmed_may_access(path: &str) -> bool {
    if path.starts_with("/static/") || path.starts_with("/confirm/") {
        return true;
    }
    UNCONFIRMED_ALLOWED.contains(&path)
}

#[must_use]
pub fn evaluate(identity: &Identity, access: RouteAccess, path: &str) -> Decision {
    let state = identity.state();
    if access.login_required && state == AccountState::Anonymous {
        return Decision::RedirectLogin;
    }
    if state == AccountState::AuthenticatedUnconfirmed && !unconfirmed_may_access(path) {
        return Decision::RedirectUnconfirmed;
    }
    if let Some(required) = access.min_role {
        if identity.role() < required {
            return Decision::Forbidden;
        }
    }
    Decision::Allow
}

fn identity_of(request: &Request) -> Identity {
    request
        .extensions()
        .get::<Identity>()
        .cloned()
        .unwrap_or_default()
}

async fn guard(access: RouteAccess, request: Request, next: Next) -> Response {
    let identity = identity_of(&request);
    match evaluate(&identity, access, request.uri().path()) {
        Decision::Allow => next.run(request).await,
        Decision::RedirectLogin => Redirect::to("/login").into_response(),
        Decision::RedirectUnconfirmed => Redirect::to("/unconfirmed").into_response(),
        Decision::Forbidden => ServiceError::Forbidden.into_response(),
    }
}

/// Resolve the session cookie once and store the [`Identity`] in request extensions.
pub async fn resolve_identity(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let identity = match session::current(&state, request.headers()).await {
        Ok(identity) => identity,
        Err(err) => {
            error!("Failed to lookup session: {err}");
            return ServiceError::Internal(anyhow::anyhow!("session lookup failed")).into_response();
        }
    };
    request.extensions_mut().insert(identity);
    next.run(request).await
}

/// Global filter: keeps unconfirmed accounts on the confirmation routes.
pub async fn confirmed_gate(request: Request, next: Next) -> Response {
    guard(RouteAccess::PUBLIC, request, next).await
}

pub async fn login_required(request: Request, next: Next) -> Response {
    guard(RouteAccess::AUTHENTICATED, request, next).await
}

pub async fn admin_required(request: Request, next: Next) -> Response {
    guard(RouteAccess::role(Role::Administrator), request, next).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::identity::CurrentUser;

    fn signed_in(confirmed: bool, role: Role) -> Identity {
        Identity::Authenticated(CurrentUser {
            id: 1,
            email: "alice@example.com".to_string(),
            username: "alice".to_string(),
            name: "alice".to_string(),
            confirmed,
            role,
            member_since_unix: 0,
        })
    }

    #[test]
    fn anonymous_on_login_route_redirects_to_login() {
        assert_eq!(
            evaluate(&Identity::Anonymous, RouteAccess::AUTHENTICATED, "/settings"),
            Decision::RedirectLogin
        );
        assert_eq!(
            evaluate(
                &Identity::Anonymous,
                RouteAccess::role(Role::Administrator),
                "/admin"
            ),
            Decision::RedirectLogin
        );
    }

    #[test]
    fn anonymous_on_public_route_is_allowed() {
        assert_eq!(
            evaluate(&Identity::Anonymous, RouteAccess::PUBLIC, "/"),
            Decision::Allow
        );
    }

    #[test]
    fn unconfirmed_is_redirected_outside_confirmation_routes() {
        let identity = signed_in(false, Role::User);
        for path in ["/", "/settings/profile", "/admin", "/manage/users"] {
            assert_eq!(
                evaluate(&identity, RouteAccess::PUBLIC, path),
                Decision::RedirectUnconfirmed,
                "path {path}"
            );
        }
    }

    #[test]
    fn unconfirmed_may_use_confirmation_routes_and_static() {
        let identity = signed_in(false, Role::User);
        for path in [
            "/login",
            "/logout",
            "/confirm",
            "/confirm/abc.def",
            "/unconfirmed",
            "/static/site.css",
        ] {
            assert_eq!(
                evaluate(&identity, RouteAccess::AUTHENTICATED, path),
                Decision::Allow,
                "path {path}"
            );
        }
    }

    #[test]
    fn unconfirmed_admin_is_redirected_before_role_check() {
        assert_eq!(
            evaluate(
                &signed_in(false, Role::Administrator),
                RouteAccess::role(Role::Administrator),
                "/admin"
            ),
            Decision::RedirectUnconfirmed
        );
    }

    #[test]
    fn confirmed_user_on_admin_route_is_forbidden() {
        assert_eq!(
            evaluate(
                &signed_in(true, Role::User),
                RouteAccess::role(Role::Administrator),
                "/admin"
            ),
            Decision::Forbidden
        );
        assert_eq!(
            evaluate(
                &signed_in(true, Role::Moderator),
                RouteAccess::role(Role::Administrator),
                "/admin"
            ),
            Decision::Forbidden
        );
    }

    #[test]
    fn confirmed_admin_is_allowed() {
        assert_eq!(
            evaluate(
                &signed_in(true, Role::Administrator),
                RouteAccess::role(Role::Administrator),
                "/admin"
            ),
            Decision::Allow
        );
    }

    #[test]
    fn role_requirement_uses_rank_not_equality() {
        assert_eq!(
            evaluate(
                &signed_in(true, Role::Administrator),
                RouteAccess::role(Role::Moderator),
                "/moderate"
            ),
            Decision::Allow
        );
    }

    #[test]
    fn prefix_lookalikes_are_not_exempt() {
        assert!(!unconfirmed_may_access("/confirmed-elsewhere"));
        assert!(!unconfirmed_may_access("/login/extra"));
        assert!(unconfirmed_may_access("/confirm/token"));
    }
}
