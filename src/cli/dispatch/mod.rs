use crate::cli::actions::{server::Args, Action};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// Shortest secret accepted for signing tokens.
pub const MIN_SECRET_KEY_BYTES: usize = 32;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let secret_key = matches
        .get_one::<String>("secret-key")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --secret-key")?;
    let key_len = secret_key.expose_secret().trim().len();
    anyhow::ensure!(
        key_len >= MIN_SECRET_KEY_BYTES,
        "AGORA_SECRET_KEY must be at least {MIN_SECRET_KEY_BYTES} bytes, got {key_len}"
    );

    let base_url = matches
        .get_one::<String>("base-url")
        .cloned()
        .unwrap_or_else(|| "http://localhost:8080".to_string());
    let parsed = Url::parse(&base_url).context("invalid AGORA_BASE_URL")?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("AGORA_BASE_URL must be an http or https URL, got: {base_url}");
    }

    let seconds = |name: &str| -> Result<i64> {
        matches
            .get_one::<i64>(name)
            .copied()
            .with_context(|| format!("missing argument: --{name}"))
    };

    Ok(Action::Server(Args {
        port,
        dsn,
        secret_key,
        base_url: base_url.trim_end_matches('/').to_string(),
        admin_email: matches.get_one::<String>("admin-email").cloned(),
        confirm_token_ttl_seconds: seconds("confirm-token-ttl-seconds")?,
        email_change_token_ttl_seconds: seconds("email-change-token-ttl-seconds")?,
        session_ttl_seconds: seconds("session-ttl-seconds")?,
        remember_ttl_seconds: seconds("remember-ttl-seconds")?,
        admin_page_size: matches.get_one::<u32>("admin-page-size").copied().unwrap_or(10),
        smtp_url: matches
            .get_one::<String>("smtp-url")
            .cloned()
            .map(SecretString::from),
        mail_from: matches
            .get_one::<String>("mail-from")
            .cloned()
            .context("missing argument: --mail-from")?,
    }))
}
