//! Cost-parameterised password hashing.
//!
//! Hashes are Argon2id PHC strings. The cost knob is the Argon2 time cost,
//! so verification reads the parameters back from the stored string and
//! keeps working after the table's cost changes.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};

use crate::error::DbError;

/// Lowest accepted cost.
pub const MIN_COST: u32 = 1;
/// Highest accepted cost.
pub const MAX_COST: u32 = 16;

/// Memory cost in KiB. Kept small; the cost knob scales time instead.
const MEMORY_KIB: u32 = 8 * 1024;

/// Hashes `plain` with the given time cost.
pub fn encrypt(plain: &str, cost: u32) -> Result<String, DbError> {
    let params = Params::new(MEMORY_KIB, cost.clamp(MIN_COST, MAX_COST), 1, None)
        .map_err(|e| DbError::PasswordEncryption(e.to_string()))?;
    let hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| DbError::PasswordEncryption(e.to_string()))?;

    hasher
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DbError::PasswordEncryption(e.to_string()))
}

/// Checks `plain` against a hash produced by [`encrypt`].
///
/// Malformed hashes never match.
pub fn verify(plain: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Generates a random alphanumeric password of `len` characters.
pub fn random_password(len: u32) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len as usize)
        .map(char::from)
        .collect()
}
