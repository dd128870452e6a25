//! Storage ports for accounts, sessions and the forum catalogue.
//!
//! Uniqueness (email, username, category and topic names) is enforced by the
//! backend and reported as typed errors; callers never pre-check.

use async_trait::async_trait;
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::auth::identity::{CurrentUser, Role};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("username already taken")]
    DuplicateUsername,
    #[error("name already exists")]
    DuplicateName,
    #[error("record not found")]
    NotFound,
    /// A foreign key rejected the write: the referenced row is missing or still in use.
    #[error("record is referenced or references a missing record")]
    Referenced,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Account row including the password hash. Stays inside the credential layer.
#[derive(Clone)]
pub struct UserRecord {
    pub user: CurrentUser,
    pub password_hash: String,
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("user", &self.user)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Fields an administrator may overwrite on any account.
#[derive(Debug, Clone)]
pub struct UserUpdate {
    pub email: String,
    pub username: String,
    pub name: String,
    pub confirmed: bool,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct NewTopic {
    pub name: String,
    pub description: String,
    pub image: Option<Vec<u8>>,
    pub category_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub image: Option<Vec<u8>>,
    pub category_id: i64,
    pub category_name: String,
}

/// 1-based page request. Page numbers below 1 are treated as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    #[must_use]
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}

/// One page of results plus the numbers a pager needs.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub pages: u32,
    pub has_prev: bool,
    pub has_next: bool,
}

impl<T> Page<T> {
    #[must_use]
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        let per_page = u64::from(request.per_page);
        let pages = u32::try_from(total.div_ceil(per_page)).unwrap_or(u32::MAX);
        Self {
            items,
            page: request.page,
            per_page: request.per_page,
            total,
            pages,
            has_prev: request.page > 1,
            has_next: request.page < pages,
        }
    }

    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
            pages: self.pages,
            has_prev: self.has_prev,
            has_next: self.has_next,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new, unconfirmed account.
    async fn insert_user(&self, user: NewUser) -> Result<CurrentUser, StoreError>;

    async fn find_user_by_id(&self, id: i64) -> Result<Option<UserRecord>, StoreError>;

    /// Look up by normalized email.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn set_confirmed(&self, id: i64) -> Result<(), StoreError>;

    async fn update_email(&self, id: i64, email: &str) -> Result<(), StoreError>;

    async fn update_password_hash(&self, id: i64, password_hash: &str) -> Result<(), StoreError>;

    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<CurrentUser, StoreError>;

    /// Every account except `id`, ordered by id.
    async fn list_users_except(&self, id: i64) -> Result<Vec<CurrentUser>, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a session hash. Expired rows of every account are dropped first.
    async fn create_session(
        &self,
        token_hash: &[u8],
        user_id: i64,
        ttl_seconds: i64,
        remember: bool,
    ) -> Result<(), StoreError>;

    /// Resolve an unexpired session to its account. Read-only.
    async fn lookup_session(&self, token_hash: &[u8]) -> Result<Option<CurrentUser>, StoreError>;

    async fn delete_session(&self, token_hash: &[u8]) -> Result<(), StoreError>;

    /// Revoke every session of an account, returning how many were removed.
    async fn delete_user_sessions(&self, user_id: i64) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ForumStore: Send + Sync {
    async fn insert_category(&self, name: &str, description: &str)
        -> Result<Category, StoreError>;

    async fn list_categories(&self, page: PageRequest) -> Result<Page<Category>, StoreError>;

    /// All categories by name, for topic forms.
    async fn all_categories(&self) -> Result<Vec<Category>, StoreError>;

    async fn delete_category(&self, id: i64) -> Result<(), StoreError>;

    async fn insert_topic(&self, topic: NewTopic) -> Result<Topic, StoreError>;

    async fn list_topics(&self, page: PageRequest) -> Result<Page<Topic>, StoreError>;

    async fn delete_topic(&self, id: i64) -> Result<(), StoreError>;
}

/// Everything the service needs from persistence.
#[async_trait]
pub trait Store: UserStore + SessionStore + ForumStore {
    /// Round trip to the backend for health checks.
    async fn ping(&self) -> Result<(), StoreError>;
}
