//! Prefixed identifiers for guard records
//!
//! Buckets and security events get opaque, URL-safe ids of the form
//! `{prefix}_{random}` with 96 bits of entropy from the OS RNG.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};

/// Prefix for [`LoginAttemptBucket`](crate::storage::LoginAttemptBucket) ids.
pub const BUCKET_PREFIX: &str = "lab";

/// Prefix for [`SecurityEvent`](crate::events::SecurityEvent) ids.
pub const EVENT_PREFIX: &str = "sev";

/// Generate a prefixed ID with 96 bits of entropy
///
/// # Panics
///
/// Panics if the OS random number generator fails, since no safe id can be
/// produced without an entropy source.
pub fn generate_prefixed_id(prefix: &str) -> String {
    let mut bytes = [0u8; 12];
    OsRng
        .try_fill_bytes(&mut bytes)
        .expect("OS RNG failure - system entropy source unavailable");

    format!("{prefix}_{}", BASE64_URL_SAFE_NO_PAD.encode(bytes))
}

/// Check that an id carries the expected prefix and enough entropy
pub fn validate_prefixed_id(id: &str, expected_prefix: &str) -> bool {
    let Some(random_part) = id
        .strip_prefix(expected_prefix)
        .and_then(|rest| rest.strip_prefix('_'))
    else {
        return false;
    };

    BASE64_URL_SAFE_NO_PAD
        .decode(random_part)
        .is_ok_and(|decoded| decoded.len() >= 12)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_prefixed_id() {
        let id = generate_prefixed_id(BUCKET_PREFIX);
        assert!(id.starts_with("lab_"));
        assert_ne!(id, generate_prefixed_id(BUCKET_PREFIX));
    }

    #[test]
    fn test_validate_prefixed_id() {
        let id = generate_prefixed_id(EVENT_PREFIX);
        assert!(validate_prefixed_id(&id, EVENT_PREFIX));
        assert!(!validate_prefixed_id(&id, BUCKET_PREFIX));
        assert!(!validate_prefixed_id("sev", EVENT_PREFIX));
        assert!(!validate_prefixed_id("sev_", EVENT_PREFIX));
        assert!(!validate_prefixed_id("sev_not base64!", EVENT_PREFIX));
    }
}
