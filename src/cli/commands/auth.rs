use clap::{Arg, Command};

fn seconds(name: &'static str, env: &'static str, help: &'static str, default: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(i64).range(1..))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("secret-key")
                .long("secret-key")
                .help("Secret used to sign confirmation and email-change tokens")
                .env("AGORA_SECRET_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("admin-email")
                .long("admin-email")
                .help("Email address that receives the Administrator role when it registers")
                .env("AGORA_ADMIN_EMAIL"),
        )
        .arg(seconds(
            "confirm-token-ttl-seconds",
            "AGORA_CONFIRM_TOKEN_TTL_SECONDS",
            "Lifetime of account confirmation links",
            "86400",
        ))
        .arg(seconds(
            "email-change-token-ttl-seconds",
            "AGORA_EMAIL_CHANGE_TOKEN_TTL_SECONDS",
            "Lifetime of email change links",
            "3600",
        ))
        .arg(seconds(
            "session-ttl-seconds",
            "AGORA_SESSION_TTL_SECONDS",
            "Server-side lifetime of a session without remember-me",
            "43200",
        ))
        .arg(seconds(
            "remember-ttl-seconds",
            "AGORA_REMEMBER_TTL_SECONDS",
            "Lifetime of a remember-me session and its cookie",
            "2592000",
        ))
        .arg(
            Arg::new("admin-page-size")
                .long("admin-page-size")
                .help("Items per page on the admin category and topic lists")
                .env("AGORA_ADMIN_PAGE_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(u32).range(1..=1000)),
        )
}
