//! Service configuration and the shared per-process state handed to handlers.

use secrecy::SecretString;
use std::sync::Arc;

use super::{
    auth::{
        password::PasswordHasher,
        token::{TokenService, DEFAULT_CONFIRM_TTL_SECONDS, DEFAULT_EMAIL_CHANGE_TTL_SECONDS},
    },
    email::EmailSender,
    store::Store,
};

const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_REMEMBER_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_ADMIN_PAGE_SIZE: u32 = 10;
const DEFAULT_MAIL_FROM: &str = "Agora <no-reply@agora.dev>";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    base_url: String,
    admin_email: Option<String>,
    confirm_token_ttl_seconds: i64,
    email_change_token_ttl_seconds: i64,
    session_ttl_seconds: i64,
    remember_ttl_seconds: i64,
    admin_page_size: u32,
    mail_from: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            admin_email: None,
            confirm_token_ttl_seconds: DEFAULT_CONFIRM_TTL_SECONDS,
            email_change_token_ttl_seconds: DEFAULT_EMAIL_CHANGE_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            remember_ttl_seconds: DEFAULT_REMEMBER_TTL_SECONDS,
            admin_page_size: DEFAULT_ADMIN_PAGE_SIZE,
            mail_from: DEFAULT_MAIL_FROM.to_string(),
        }
    }

    /// Accounts registering with this email get the administrator role.
    #[must_use]
    pub fn with_admin_email(mut self, email: Option<String>) -> Self {
        self.admin_email = email
            .map(|email| super::auth::utils::normalize_email(&email))
            .filter(|email| !email.is_empty());
        self
    }

    #[must_use]
    pub fn with_confirm_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.confirm_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_email_change_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.email_change_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_admin_page_size(mut self, size: u32) -> Self {
        self.admin_page_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_mail_from(mut self, from: String) -> Self {
        self.mail_from = from;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn admin_email(&self) -> Option<&str> {
        self.admin_email.as_deref()
    }

    #[must_use]
    pub fn confirm_token_ttl_seconds(&self) -> i64 {
        self.confirm_token_ttl_seconds
    }

    #[must_use]
    pub fn email_change_token_ttl_seconds(&self) -> i64 {
        self.email_change_token_ttl_seconds
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn remember_ttl_seconds(&self) -> i64 {
        self.remember_ttl_seconds
    }

    #[must_use]
    pub fn admin_page_size(&self) -> u32 {
        self.admin_page_size
    }

    #[must_use]
    pub fn mail_from(&self) -> &str {
        &self.mail_from
    }

    /// Only mark cookies secure when the site is served over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

/// Shared state behind every request.
pub struct AppState {
    config: AuthConfig,
    tokens: TokenService,
    passwords: PasswordHasher,
    store: Arc<dyn Store>,
    mailer: Arc<dyn EmailSender>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        secret: SecretString,
        store: Arc<dyn Store>,
        mailer: Arc<dyn EmailSender>,
    ) -> Self {
        let tokens = TokenService::new(secret)
            .with_confirm_ttl_seconds(config.confirm_token_ttl_seconds())
            .with_email_change_ttl_seconds(config.email_change_token_ttl_seconds());
        Self {
            config,
            tokens,
            passwords: PasswordHasher::default(),
            store,
            mailer,
        }
    }

    #[must_use]
    pub fn with_password_hasher(mut self, passwords: PasswordHasher) -> Self {
        self.passwords = passwords;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn passwords(&self) -> &PasswordHasher {
        &self.passwords
    }

    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    #[must_use]
    pub fn mailer(&self) -> Arc<dyn EmailSender> {
        Arc::clone(&self.mailer)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}
