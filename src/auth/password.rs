use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::AppError;
use crate::Result;

/// Password hashing seam for administrative identities.
pub trait PasswordService: Send + Sync {
    fn hash(&self, plain: &str) -> Result<String>;

    fn verify(&self, plain: &str, digest: &str) -> Result<bool>;
}

/// Argon2id with a random salt per digest, stored as a PHC string.
#[derive(Default, Clone)]
pub struct Argon2Passwords;

impl PasswordService for Argon2Passwords {
    fn hash(&self, plain: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(plain.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::InternalError(format!("Hashing failed: {}", e)))
    }

    fn verify(&self, plain: &str, digest: &str) -> Result<bool> {
        let parsed = PasswordHash::new(digest)
            .map_err(|e| AppError::InternalError(format!("Invalid hash format: {}", e)))?;

        match Argon2::default().verify_password(plain.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AppError::InternalError(format!("Password verification failed: {}", e))),
        }
    }
}
