//! Argon2id password hashing.

use crate::config::HashConfig;
use crate::{Error, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};

/// Hashes and verifies account passwords
///
/// Hashing is CPU- and memory-bound, so both operations run on the blocking
/// thread pool.
#[derive(Clone)]
pub struct CredentialHasher {
    params: Params,
}

impl CredentialHasher {
    /// Build a hasher from configured cost parameters
    pub fn new(config: &HashConfig) -> Result<Self> {
        let params = Params::new(
            config.memory_cost_kib,
            config.time_cost,
            config.parallelism,
            None,
        )
        .map_err(|e| Error::config("auth.hash", format!("invalid argon2 parameters: {e}")))?;

        Ok(Self { params })
    }

    /// Hash a password into a PHC string (salt and parameters embedded)
    pub async fn hash(&self, password: &str) -> Result<String> {
        let params = self.params.clone();
        let password = password.to_owned();

        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| Error::Crypto(format!("failed to hash password: {e}")))
        })
        .await
        .map_err(|e| Error::Other(format!("hashing task failed: {e}")))?
    }

    /// Check a password against a stored PHC string
    ///
    /// A mismatch is `Ok(false)`; a malformed hash is an error.
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let password = password.to_owned();
        let hash = hash.to_owned();

        tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&hash)
                .map_err(|e| Error::Crypto(format!("malformed password hash: {e}")))?;

            // Cost parameters come from the stored hash
            match Argon2::default().verify_password(password.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(argon2::password_hash::Error::Password) => Ok(false),
                Err(e) => Err(Error::Crypto(format!("failed to verify password: {e}"))),
            }
        })
        .await
        .map_err(|e| Error::Other(format!("hashing task failed: {e}")))?
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_hasher() -> CredentialHasher {
        CredentialHasher::new(&HashConfig {
            memory_cost_kib: 8,
            time_cost: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn hash_then_verify() {
        let hasher = cheap_hasher();
        let hash = hasher.hash("hunter2").await.unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("hunter2", &hash).await.unwrap());
        assert!(!hasher.verify("hunter3", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn same_password_gets_distinct_salts() {
        let hasher = cheap_hasher();
        let a = hasher.hash("pw").await.unwrap();
        let b = hasher.hash("pw").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn malformed_hash_is_an_error() {
        let hasher = cheap_hasher();
        assert!(hasher.verify("pw", "not-a-phc-string").await.is_err());
    }

    #[test]
    fn invalid_params_are_a_config_error() {
        let result = CredentialHasher::new(&HashConfig {
            memory_cost_kib: 1,
            time_cost: 1,
            parallelism: 1,
        });
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
