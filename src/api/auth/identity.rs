//! Request identity and role ordering.

use serde::Serialize;
use utoipa::ToSchema;

/// Permission level. The derived ordering is the rank ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, ToSchema)]
pub enum Role {
    Anonymous,
    User,
    Moderator,
    Administrator,
}

impl Role {
    /// Roles that can be assigned to stored accounts.
    pub const ASSIGNABLE: [Self; 3] = [Self::User, Self::Moderator, Self::Administrator];

    /// Role given to new accounts.
    pub const DEFAULT: Self = Self::User;

    /// Row id in the `roles` table; `Anonymous` is never stored.
    #[must_use]
    pub const fn id(self) -> i16 {
        match self {
            Self::Anonymous => 0,
            Self::User => 1,
            Self::Moderator => 2,
            Self::Administrator => 3,
        }
    }

    #[must_use]
    pub const fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Self::User),
            2 => Some(Self::Moderator),
            3 => Some(Self::Administrator),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Anonymous => "Anonymous",
            Self::User => "User",
            Self::Moderator => "Moderator",
            Self::Administrator => "Administrator",
        }
    }
}

/// A stored account as seen by the rest of the service. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CurrentUser {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub name: String,
    pub confirmed: bool,
    pub role: Role,
    pub member_since_unix: i64,
}

/// Per-request account state used by the access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    Anonymous,
    AuthenticatedUnconfirmed,
    AuthenticatedConfirmed,
}

/// Who is making the request. Resolved once per request from the session cookie
/// and passed to handlers as a request extension.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Identity {
    #[default]
    Anonymous,
    Authenticated(CurrentUser),
}

impl Identity {
    #[must_use]
    pub fn state(&self) -> AccountState {
        match self {
            Self::Anonymous => AccountState::Anonymous,
            Self::Authenticated(user) if user.confirmed => AccountState::AuthenticatedConfirmed,
            Self::Authenticated(_) => AccountState::AuthenticatedUnconfirmed,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Self::Anonymous => Role::Anonymous,
            Self::Authenticated(user) => user.role,
        }
    }

    #[must_use]
    pub fn user(&self) -> Option<&CurrentUser> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated(user) => Some(user),
        }
    }
}
