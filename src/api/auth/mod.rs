//! Accounts, sessions and the access policy.

pub mod identity;
pub mod password;
pub mod policy;
pub mod service;
pub mod session;
pub mod token;
pub mod utils;

pub use identity::{AccountState, CurrentUser, Identity, Role};
pub use token::{Intent, TokenError, TokenService};
