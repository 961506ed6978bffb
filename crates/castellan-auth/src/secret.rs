//! Password hashing and token generation.

use argon2::Argon2;
use argon2::password_hash::{
    Error as PasswordHashError, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
    rand_core::OsRng,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use once_cell::sync::Lazy;
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::error::{AuthError, AuthResult};

const TOKEN_BYTES: usize = 32;

/// Hash checked when the username is unknown, so both paths cost the same.
static DUMMY_HASH: Lazy<Option<String>> = Lazy::new(|| hash_secret("castellan-timing-pad").ok());

pub(crate) fn hash_secret(input: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(input.as_bytes(), &salt)
        .map_err(|detail| AuthError::SecretHash { detail })?;
    Ok(hash.to_string())
}

pub(crate) fn verify_secret(username: &str, expected_hash: &str, candidate: &str) -> AuthResult<bool> {
    let parsed = PasswordHash::new(expected_hash).map_err(|detail| AuthError::StoredHashInvalid {
        username: username.to_string(),
        detail,
    })?;
    match Argon2::default().verify_password(candidate.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(PasswordHashError::Password) => Ok(false),
        Err(detail) => Err(AuthError::SecretHash { detail }),
    }
}

/// Burn roughly one verification worth of work.
pub(crate) fn verify_dummy(candidate: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_secret("", hash, candidate);
    }
}

/// Opaque session token: 32 random bytes, URL-safe base64.
pub(crate) fn generate_token() -> String {
    let mut bytes = [0_u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn generate_password(length: usize) -> String {
    let mut rng = rand::rng();
    std::iter::repeat_with(|| char::from(rng.sample(Alphanumeric)))
        .take(length)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() -> AuthResult<()> {
        let hash = hash_secret("hunter22")?;
        assert!(verify_secret("a", &hash, "hunter22")?);
        assert!(!verify_secret("a", &hash, "hunter23")?);
        assert!(matches!(
            verify_secret("a", "not-a-hash", "x"),
            Err(AuthError::StoredHashInvalid { .. })
        ));
        Ok(())
    }

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(generate_password(20).len(), 20);
    }
}
