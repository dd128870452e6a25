//! Argon2id password hashing.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier as _,
};
use std::sync::OnceLock;

/// Hashes and verifies passwords as PHC strings.
///
/// Verification reads the parameters embedded in the stored hash, so changing
/// the cost only affects newly written hashes.
#[derive(Clone, Debug)]
pub struct PasswordHasher {
    params: argon2::Params,
    dummy_hash: OnceLock<String>,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            params: argon2::Params::default(),
            dummy_hash: OnceLock::new(),
        }
    }
}

impl PasswordHasher {
    /// Build a hasher with explicit Argon2 cost parameters (memory in KiB).
    ///
    /// # Errors
    /// Returns an error if the parameters are outside Argon2's accepted range.
    pub fn with_params(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self> {
        let params = argon2::Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|err| anyhow!("invalid Argon2 parameters: {err}"))?;
        Ok(Self {
            params,
            dummy_hash: OnceLock::new(),
        })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash a raw password with a fresh random salt.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|_| anyhow!("failed to hash password"))?
            .to_string();
        Ok(hash)
    }

    /// Check a candidate password against a stored PHC hash.
    #[must_use]
    pub fn verify(&self, password: &str, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        self.argon2()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    /// Burn the same work as a real verification for logins with unknown emails.
    pub fn verify_dummy(&self, password: &str) {
        let dummy = self
            .dummy_hash
            .get_or_init(|| self.hash("agora-dummy-password").unwrap_or_default());
        let _ = self.verify(password, dummy);
    }
}
