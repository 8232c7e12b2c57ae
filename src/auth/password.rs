/// Salted one-way hashing for passwords, API keys and backup codes
use crate::error::{ApiError, ApiResult};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

/// Salted slow hash (Argon2id) for passwords and other stored secrets, used in place of bcrypt.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
}

impl Default for SecretHasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

impl SecretHasher {
    /// Hasher with explicit cost parameters (memory in KiB)
    pub fn with_params(memory_kib: u32, iterations: u32, parallelism: u32) -> ApiResult<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| ApiError::Internal(format!("Invalid hashing parameters: {}", e)))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hash a secret with a fresh random salt
    pub fn hash(&self, secret: &str) -> ApiResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ApiError::Internal(format!("Failed to hash secret: {}", e)))
    }

    /// Constant-time comparison of a secret against a stored PHC hash string
    pub fn verify(&self, secret: &str, stored_hash: &str) -> bool {
        match PasswordHash::new(stored_hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!("Stored hash is not a valid PHC string: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> SecretHasher {
    SecretHasher::with_params(1024, 1, 1).unwrap()
}
