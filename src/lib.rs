//! # Agora (forum accounts and administration)
//!
//! `agora` serves the account and administration surface of a forum: registration,
//! login and logout, email confirmation, self-service email and password changes,
//! and admin management of users, topic categories and topics.
//!
//! ## Account states
//!
//! Every request resolves to one of three states: anonymous, authenticated but
//! unconfirmed, or authenticated and confirmed. Unconfirmed accounts may only reach
//! the login, logout and confirmation routes; everything else redirects them to
//! `/unconfirmed` until the emailed token is consumed.
//!
//! ## Tokens
//!
//! Confirmation and email-change links carry HMAC-SHA256 signed, expiring claims.
//! Nothing about them is stored; the state they authorize is what persists.
//!
//! ## Sessions
//!
//! Sessions are opaque random cookies. Only the SHA-256 hash of the cookie value is
//! stored, and a password change revokes every session of the account.
//!
//! ## Roles
//!
//! Roles form a total order `anonymous < user < moderator < administrator`. Admin
//! routes require `administrator`; lower ranks get `403 Forbidden`.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
