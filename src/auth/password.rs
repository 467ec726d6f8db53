//! Password policy, hashing and verification
//!
//! Hashes are argon2id PHC strings; the salt and parameters travel inside
//! the stored string so verification needs nothing else.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::types::GrainError;

/// Minimum accepted password length
pub const MIN_PASSWORD_LEN: usize = 8;

/// Reject passwords that do not meet the policy
pub fn check_password_policy(password: &str) -> Result<(), GrainError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(GrainError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if password.trim().is_empty() {
        return Err(GrainError::BadRequest("Password must not be blank".into()));
    }
    Ok(())
}

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> Result<String, GrainError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GrainError::Auth(format!("Failed to hash password: {e}")))
}

/// Verify a password against a stored hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, GrainError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| GrainError::Auth(format!("Invalid password hash format: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("silo-7-north-bin").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("silo-7-north-bin", &hash).unwrap());
        assert!(!verify_password("silo-8-south-bin", &hash).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let first = hash_password("same-password").unwrap();
        let second = hash_password("same-password").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_invalid_hash_format() {
        assert!(verify_password("password", "not-a-valid-hash").is_err());
    }

    #[test]
    fn test_policy() {
        assert!(check_password_policy("short").is_err());
        assert!(check_password_policy("        ").is_err());
        assert!(check_password_policy("long-enough").is_ok());
    }
}
