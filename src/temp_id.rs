//! Deterministic fallback identifiers
//!
//! `TMP-` + base32(HMAC-SHA256(salt, normalized_name)[..10]).
//! 80 bits of digest keeps collisions negligible at spreadsheet scale while the
//! identifier stays short enough to eyeball in a join.

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ConfigError;

type HmacSha256 = Hmac<Sha256>;

/// Literal prefix separating synthetic identifiers from registry ones
pub const TEMP_ID_PREFIX: &str = "TMP-";

/// Bytes of the digest kept in the identifier
const DIGEST_PREFIX_LEN: usize = 10;

/// Minimum salt length accepted at startup
pub const MIN_SALT_LEN: usize = 16;

/// Compute the fallback identifier for a normalized name.
///
/// Pure: the same `(normalized_name, salt)` pair always yields the same output.
/// Changing the salt changes every identifier ever generated.
pub fn generate(normalized_name: &str, salt: &str) -> String {
    // HMAC pads or hashes the key to block size, so no length is rejected
    let mut mac =
        HmacSha256::new_from_slice(salt.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(normalized_name.as_bytes());
    let digest = mac.finalize().into_bytes();
    format!(
        "{}{}",
        TEMP_ID_PREFIX,
        BASE32_NOPAD.encode(&digest[..DIGEST_PREFIX_LEN])
    )
}

/// Whether an identifier was minted by [`generate`]
pub fn is_temp_id(company_id: &str) -> bool {
    company_id.starts_with(TEMP_ID_PREFIX)
}

/// Salt-bound generator, validated once at startup
#[derive(Clone)]
pub struct TempIdGenerator {
    salt: String,
}

impl TempIdGenerator {
    pub fn new(salt: impl Into<String>) -> Result<Self, ConfigError> {
        let salt = salt.into();
        if salt.trim().is_empty() {
            return Err(ConfigError::MissingSalt);
        }
        if salt.len() < MIN_SALT_LEN {
            return Err(ConfigError::WeakSalt {
                min_len: MIN_SALT_LEN,
            });
        }
        Ok(Self { salt })
    }

    pub fn generate(&self, normalized_name: &str) -> String {
        generate(normalized_name, &self.salt)
    }
}

impl std::fmt::Debug for TempIdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempIdGenerator")
            .field("salt", &"<redacted>")
            .finish()
    }
}
