//! Credential operations: registration, password checks, confirmation and
//! the email and password change flows.

use tracing::{info, warn};

use super::{
    identity::{CurrentUser, Role},
    session,
    token::{Intent, TokenError},
    utils::{build_link, normalize_email},
};
use crate::api::{
    email::{self, deliver},
    error::ServiceError,
    state::AppState,
    store::{NewUser, StoreError},
};

/// Result of a successful registration.
#[derive(Debug, Clone)]
pub struct Registered {
    pub user: CurrentUser,
    /// Whether the confirmation email was handed to the sender.
    pub email_sent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    AlreadyConfirmed,
}

/// Create an unconfirmed account and send its confirmation email.
///
/// A failed email send is logged and does not undo the registration.
///
/// # Errors
/// `DuplicateEmail` or `DuplicateUsername` when either is already taken, or an
/// internal error if hashing or storage fails.
pub async fn register(
    state: &AppState,
    email: &str,
    username: &str,
    password: &str,
) -> Result<Registered, ServiceError> {
    let email = normalize_email(email);
    let username = username.trim().to_string();
    let password_hash = state.passwords().hash(password)?;
    let role = if state.config().admin_email() == Some(email.as_str()) {
        Role::Administrator
    } else {
        Role::DEFAULT
    };

    let user = state
        .store()
        .insert_user(NewUser {
            email,
            name: username.clone(),
            username,
            password_hash,
            role,
        })
        .await?;
    info!(user_id = user.id, role = role.name(), "registered account");

    let email_sent = match send_confirmation(state, &user).await {
        Ok(()) => true,
        Err(err) => {
            warn!(user_id = user.id, "Confirmation email not sent: {err}");
            false
        }
    };
    Ok(Registered { user, email_sent })
}

/// Issue a fresh confirmation token and email it to the account address.
///
/// # Errors
/// `TransientSendFailure` if delivery fails, or an internal error if the token
/// cannot be issued.
pub async fn send_confirmation(state: &AppState, user: &CurrentUser) -> Result<(), ServiceError> {
    let token = state.tokens().issue(user.id, Intent::Confirm, None)?;
    let link = build_link(state.config().base_url(), &format!("confirm/{token}"));
    let ttl = state.config().confirm_token_ttl_seconds();
    deliver(state.mailer(), email::confirm_account(user, link, ttl)).await
}

/// Check email and password. Unknown emails cost the same as a wrong password
/// and produce the same `None`.
///
/// # Errors
/// Returns an internal error if the lookup fails.
pub async fn authenticate(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<Option<CurrentUser>, ServiceError> {
    let email = normalize_email(email);
    match state.store().find_user_by_email(&email).await? {
        Some(record) if state.passwords().verify(password, &record.password_hash) => {
            Ok(Some(record.user))
        }
        Some(_) => Ok(None),
        None => {
            state.passwords().verify_dummy(password);
            Ok(None)
        }
    }
}

/// Check `candidate` against the stored password of `user_id`.
///
/// # Errors
/// `NotFound` if the account vanished, or an internal error if the lookup fails.
pub async fn verify_password(
    state: &AppState,
    user_id: i64,
    candidate: &str,
) -> Result<bool, ServiceError> {
    let record = state
        .store()
        .find_user_by_id(user_id)
        .await?
        .ok_or(ServiceError::NotFound)?;
    Ok(state.passwords().verify(candidate, &record.password_hash))
}

/// Consume a confirmation token for `user`.
///
/// # Errors
/// `Token` if the token is malformed, expired, for another intent, or for
/// another account.
pub async fn confirm(
    state: &AppState,
    user: &CurrentUser,
    token: &str,
) -> Result<ConfirmOutcome, ServiceError> {
    if user.confirmed {
        return Ok(ConfirmOutcome::AlreadyConfirmed);
    }
    let claims = state.tokens().verify(token, Intent::Confirm)?;
    if claims.uid != user.id {
        return Err(TokenError::Invalid.into());
    }
    state.store().set_confirmed(user.id).await?;
    info!(user_id = user.id, "account confirmed");
    Ok(ConfirmOutcome::Confirmed)
}

/// Email a change-email token to `new_email`. The caller has verified the password.
///
/// # Errors
/// `EmailInUse` if any account already holds the address, the caller's own
/// included, or `TransientSendFailure` if delivery fails.
pub async fn request_email_change(
    state: &AppState,
    user: &CurrentUser,
    new_email: &str,
) -> Result<(), ServiceError> {
    let new_email = normalize_email(new_email);
    if new_email == user.email || state.store().find_user_by_email(&new_email).await?.is_some() {
        return Err(ServiceError::EmailInUse);
    }
    let token = state
        .tokens()
        .issue(user.id, Intent::ChangeEmail, Some(new_email.clone()))?;
    let link = build_link(state.config().base_url(), &format!("change-email/{token}"));
    let ttl = state.config().email_change_token_ttl_seconds();
    deliver(state.mailer(), email::change_email(user, &new_email, link, ttl)).await
}

/// Apply a change-email token for `user` and return the new address.
///
/// # Errors
/// `Token` for unusable tokens, `EmailInUse` if the address was claimed in the
/// meantime.
pub async fn change_email(
    state: &AppState,
    user: &CurrentUser,
    token: &str,
) -> Result<String, ServiceError> {
    let claims = state.tokens().verify(token, Intent::ChangeEmail)?;
    if claims.uid != user.id {
        return Err(TokenError::Invalid.into());
    }
    let new_email = claims.new_email.ok_or(TokenError::Malformed)?;
    match state.store().update_email(user.id, &new_email).await {
        Ok(()) => {
            info!(user_id = user.id, "email address changed");
            Ok(new_email)
        }
        Err(StoreError::DuplicateEmail) => Err(ServiceError::EmailInUse),
        Err(err) => Err(err.into()),
    }
}

/// Store a new password and revoke every session of the account.
/// The caller has verified the old password.
///
/// # Errors
/// Returns an internal error if hashing or storage fails.
pub async fn change_password(
    state: &AppState,
    user_id: i64,
    new_password: &str,
) -> Result<(), ServiceError> {
    let password_hash = state.passwords().hash(new_password)?;
    state
        .store()
        .update_password_hash(user_id, &password_hash)
        .await?;
    session::logout_everywhere(state, user_id).await?;
    info!(user_id, "password changed, sessions revoked");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        auth::{password::PasswordHasher, token::TokenService},
        email::{EmailMessage, EmailSender},
        state::AuthConfig,
        store::{MemoryStore, SessionStore},
    };
    use anyhow::{anyhow, Context, Result};
    use secrecy::SecretString;
    use std::sync::{Arc, Mutex};

    const SECRET: &str = "service-test-secret";

    #[derive(Default)]
    struct Outbox {
        messages: Mutex<Vec<EmailMessage>>,
        fail: bool,
    }

    impl EmailSender for Outbox {
        fn send(&self, message: &EmailMessage) -> Result<()> {
            if self.fail {
                return Err(anyhow!("smtp down"));
            }
            self.messages
                .lock()
                .map_err(|_| anyhow!("outbox poisoned"))?
                .push(message.clone());
            Ok(())
        }
    }

    impl Outbox {
        fn last_token(&self) -> Result<String> {
            let messages = self.messages.lock().map_err(|_| anyhow!("poisoned"))?;
            let message = messages.last().context("no email sent")?;
            let token = message
                .action_url
                .rsplit('/')
                .next()
                .context("link has no token")?;
            Ok(token.to_string())
        }
    }

    fn state_on(store: Arc<MemoryStore>, outbox: Arc<Outbox>, config: AuthConfig) -> Result<AppState> {
        Ok(AppState::new(config, SecretString::from(SECRET), store, outbox)
            .with_password_hasher(PasswordHasher::with_params(1024, 1, 1)?))
    }

    fn state_with(outbox: Arc<Outbox>, config: AuthConfig) -> Result<AppState> {
        state_on(Arc::new(MemoryStore::new()), outbox, config)
    }

    fn state(outbox: Arc<Outbox>) -> Result<AppState> {
        state_with(outbox, AuthConfig::new("http://localhost:8080".into()))
    }

    #[tokio::test]
    async fn register_then_verify_password() -> Result<()> {
        let outbox = Arc::new(Outbox::default());
        let state = state(outbox.clone())?;
        let registered = register(&state, "Alice@Example.com", "alice", "pw123").await?;
        assert!(!registered.user.confirmed);
        assert!(registered.email_sent);
        assert_eq!(registered.user.email, "alice@example.com");
        assert_eq!(registered.user.role, Role::User);
        assert!(verify_password(&state, registered.user.id, "pw123").await?);
        assert!(!verify_password(&state, registered.user.id, "nope").await?);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_email_registration_fails_without_partial_record() -> Result<()> {
        let outbox = Arc::new(Outbox::default());
        let state = state(outbox.clone())?;
        register(&state, "alice@example.com", "alice", "pw").await?;
        let second = register(&state, "ALICE@example.com", "alice2", "pw").await;
        assert!(matches!(second, Err(ServiceError::DuplicateEmail)));
        assert!(state
            .store()
            .find_user_by_email("alice@example.com")
            .await?
            .is_some_and(|record| record.user.username == "alice"));
        assert_eq!(state.store().list_users_except(0).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_registrations_with_one_email_admit_one() -> Result<()> {
        let state = state(Arc::new(Outbox::default()))?;
        let (first, second) = tokio::join!(
            register(&state, "race@example.com", "racer_one", "pw"),
            register(&state, "RACE@example.com", "racer_two", "pw"),
        );
        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|outcome| matches!(outcome, Err(ServiceError::DuplicateEmail))));
        assert_eq!(state.store().list_users_except(0).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_registrations_with_one_username_admit_one() -> Result<()> {
        let state = Arc::new(state(Arc::new(Outbox::default()))?);
        let mut tasks = tokio::task::JoinSet::new();
        for email in ["one@example.com", "two@example.com", "three@example.com"] {
            let state = Arc::clone(&state);
            tasks.spawn(async move { register(&state, email, "taken", "pw").await });
        }

        let mut registered = 0;
        let mut duplicates = 0;
        while let Some(outcome) = tasks.join_next().await {
            match outcome? {
                Ok(_) => registered += 1,
                Err(ServiceError::DuplicateUsername) => duplicates += 1,
                Err(err) => return Err(anyhow!("unexpected error: {err}")),
            }
        }
        assert_eq!((registered, duplicates), (1, 2));
        assert_eq!(state.store().list_users_except(0).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn failed_email_does_not_undo_registration() -> Result<()> {
        let outbox = Arc::new(Outbox {
            fail: true,
            ..Outbox::default()
        });
        let state = state(outbox)?;
        let registered = register(&state, "bob@example.com", "bob", "pw").await?;
        assert!(!registered.email_sent);
        assert!(state
            .store()
            .find_user_by_email("bob@example.com")
            .await?
            .is_some());
        Ok(())
    }

    #[tokio::test]
    async fn admin_email_registers_as_administrator() -> Result<()> {
        let config = AuthConfig::new("http://localhost:8080".into())
            .with_admin_email(Some("root@example.com".into()));
        let state = state_with(Arc::new(Outbox::default()), config)?;
        let registered = register(&state, "root@example.com", "root", "pw").await?;
        assert_eq!(registered.user.role, Role::Administrator);
        Ok(())
    }

    #[tokio::test]
    async fn authenticate_is_generic_for_unknown_email_and_wrong_password() -> Result<()> {
        let state = state(Arc::new(Outbox::default()))?;
        register(&state, "alice@example.com", "alice", "pw").await?;
        assert!(authenticate(&state, "alice@example.com", "pw").await?.is_some());
        assert!(authenticate(&state, "alice@example.com", "bad").await?.is_none());
        assert!(authenticate(&state, "ghost@example.com", "pw").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn confirm_with_emailed_token() -> Result<()> {
        let outbox = Arc::new(Outbox::default());
        let state = state(outbox.clone())?;
        let user = register(&state, "alice@example.com", "alice", "pw").await?.user;
        let token = outbox.last_token()?;
        assert_eq!(
            confirm(&state, &user, &token).await?,
            ConfirmOutcome::Confirmed
        );
        let stored = state
            .store()
            .find_user_by_id(user.id)
            .await?
            .context("user exists")?;
        assert!(stored.user.confirmed);
        assert_eq!(
            confirm(&state, &stored.user, &token).await?,
            ConfirmOutcome::AlreadyConfirmed
        );
        Ok(())
    }

    #[tokio::test]
    async fn confirm_rejects_token_of_another_account() -> Result<()> {
        let outbox = Arc::new(Outbox::default());
        let state = state(outbox.clone())?;
        register(&state, "alice@example.com", "alice", "pw").await?;
        let alice_token = outbox.last_token()?;
        let bob = register(&state, "bob@example.com", "bob", "pw").await?.user;
        let result = confirm(&state, &bob, &alice_token).await;
        assert!(matches!(
            result,
            Err(ServiceError::Token(TokenError::Invalid))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn confirm_rejects_expired_token() -> Result<()> {
        let state = state(Arc::new(Outbox::default()))?;
        let user = register(&state, "alice@example.com", "alice", "pw").await?.user;
        let stale = TokenService::new(SecretString::from(SECRET)).issue_at(
            user.id,
            Intent::Confirm,
            None,
            0,
        )?;
        assert!(matches!(
            confirm(&state, &user, &stale).await,
            Err(ServiceError::Token(TokenError::Expired))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn confirmation_mail_states_configured_lifetime() -> Result<()> {
        let outbox = Arc::new(Outbox::default());
        let config =
            AuthConfig::new("http://localhost:8080".into()).with_confirm_token_ttl_seconds(2 * 3_600);
        let state = state_with(outbox.clone(), config)?;
        register(&state, "alice@example.com", "alice", "pw").await?;
        let messages = outbox.messages.lock().map_err(|_| anyhow!("poisoned"))?;
        let message = messages.last().context("no email sent")?;
        assert!(message.body.contains("The link expires in 2 hours."));
        Ok(())
    }

    #[tokio::test]
    async fn email_change_round_trip() -> Result<()> {
        let outbox = Arc::new(Outbox::default());
        let state = state(outbox.clone())?;
        let user = register(&state, "alice@example.com", "alice", "pw").await?.user;
        request_email_change(&state, &user, "Alice2@Example.com").await?;
        let token = outbox.last_token()?;
        assert_eq!(change_email(&state, &user, &token).await?, "alice2@example.com");
        assert!(state
            .store()
            .find_user_by_email("alice2@example.com")
            .await?
            .is_some());
        Ok(())
    }

    #[tokio::test]
    async fn email_change_to_taken_address_fails() -> Result<()> {
        let outbox = Arc::new(Outbox::default());
        let state = state(outbox.clone())?;
        let alice = register(&state, "alice@example.com", "alice", "pw").await?.user;
        register(&state, "bob@example.com", "bob", "pw").await?;
        assert!(matches!(
            request_email_change(&state, &alice, "bob@example.com").await,
            Err(ServiceError::EmailInUse)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn email_change_to_own_address_is_refused() -> Result<()> {
        let outbox = Arc::new(Outbox::default());
        let state = state(outbox.clone())?;
        let alice = register(&state, "alice@example.com", "alice", "pw").await?.user;
        let sent_before = outbox.messages.lock().map_err(|_| anyhow!("poisoned"))?.len();
        assert!(matches!(
            request_email_change(&state, &alice, " Alice@Example.com ").await,
            Err(ServiceError::EmailInUse)
        ));
        let sent_after = outbox.messages.lock().map_err(|_| anyhow!("poisoned"))?.len();
        assert_eq!(sent_before, sent_after);
        Ok(())
    }

    #[tokio::test]
    async fn email_claimed_after_token_issue_reports_in_use() -> Result<()> {
        let outbox = Arc::new(Outbox::default());
        let state = state(outbox.clone())?;
        let alice = register(&state, "alice@example.com", "alice", "pw").await?.user;
        request_email_change(&state, &alice, "shared@example.com").await?;
        let token = outbox.last_token()?;
        register(&state, "shared@example.com", "carol", "pw").await?;
        assert!(matches!(
            change_email(&state, &alice, &token).await,
            Err(ServiceError::EmailInUse)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn confirm_token_cannot_change_email() -> Result<()> {
        let outbox = Arc::new(Outbox::default());
        let state = state(outbox.clone())?;
        let user = register(&state, "alice@example.com", "alice", "pw").await?.user;
        let confirm_token = outbox.last_token()?;
        assert!(matches!(
            change_email(&state, &user, &confirm_token).await,
            Err(ServiceError::Token(TokenError::Invalid))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn change_password_revokes_sessions() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let state = state_on(
            store.clone(),
            Arc::new(Outbox::default()),
            AuthConfig::new("http://localhost:8080".into()),
        )?;
        let user = register(&state, "alice@example.com", "alice", "old").await?.user;
        let other = register(&state, "bob@example.com", "bob", "pw").await?.user;
        state
            .store()
            .create_session(b"hash-one", user.id, 3600, false)
            .await?;
        state
            .store()
            .create_session(b"hash-two", user.id, 3600, true)
            .await?;
        state
            .store()
            .create_session(b"hash-bob", other.id, 3600, false)
            .await?;
        assert_eq!(store.session_count().await, 3);
        change_password(&state, user.id, "new").await?;
        assert_eq!(store.session_count().await, 1);
        assert!(state.store().lookup_session(b"hash-bob").await?.is_some());
        assert!(state.store().lookup_session(b"hash-one").await?.is_none());
        assert!(state.store().lookup_session(b"hash-two").await?.is_none());
        assert!(verify_password(&state, user.id, "new").await?);
        assert!(!verify_password(&state, user.id, "old").await?);
        Ok(())
    }
}
