//! Password check for the privileged bot-count query.

use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

/// Salted SHA-512 digest check.
///
/// With no digest configured every password is refused.
#[derive(Clone)]
pub struct AdminAuth {
    salt: String,
    digest: Option<String>,
}

impl std::fmt::Debug for AdminAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAuth")
            .field("enabled", &self.digest.is_some())
            .finish_non_exhaustive()
    }
}

impl AdminAuth {
    /// `digest` is the lowercase hex form produced by [`AdminAuth::digest`].
    pub fn new(salt: impl Into<String>, digest: Option<&str>) -> Self {
        Self {
            salt: salt.into(),
            digest: digest
                .map(|d| d.trim().to_ascii_lowercase())
                .filter(|d| !d.is_empty()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(String::new(), None)
    }

    /// Hex SHA-512 of `salt || password`.
    pub fn digest(salt: &str, password: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(salt.as_bytes());
        hasher.update(password.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub const fn is_enabled(&self) -> bool {
        self.digest.is_some()
    }

    /// Constant-time comparison against the configured digest.
    pub fn verify(&self, password: &str) -> bool {
        let Some(expected) = &self.digest else {
            return false;
        };
        let candidate = Self::digest(&self.salt, password);
        candidate.as_bytes().ct_eq(expected.as_bytes()).into()
    }
}
