//! Field level encryption and masking for sensitive values
//!
//! PII-bearing fields (contact numbers, tax ids, license numbers, security
//! answers) are sealed with AES-256-GCM before they are persisted. Every call to
//! [`SensitiveFieldCipher::encrypt`] draws a fresh 96-bit nonce from the OS RNG,
//! so the same plaintext never produces the same ciphertext twice and any
//! tampering is detected on decryption.
//!
//! The stored form is standard base64 of `nonce || ciphertext || tag`.
//!
//! Masking is a separate, irreversible transform used only for display and
//! log output.

use std::{fmt, sync::LazyLock};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, prelude::BASE64_STANDARD};
use rand::{TryRngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{config::field_encryption_key_from_env, error::CryptoError};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Smallest possible sealed value: nonce, tag and one byte of ciphertext.
const MIN_SEALED_LEN: usize = NONCE_LEN + TAG_LEN + 1;

/// Base64 length of [`MIN_SEALED_LEN`] bytes.
const MIN_ENCODED_LEN: usize = MIN_SEALED_LEN.div_ceil(3) * 4;

/// Placeholder returned by [`SensitiveFieldCipher::mask`] for values too short to
/// partially reveal.
pub const MASK_PLACEHOLDER: &str = "****";

const MASK_CHAR: char = '*';

static BASE64_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").expect("Invalid base64 regex pattern")
});

/// Symmetric cipher for sensitive record fields.
///
/// Keyed from a configured secret; there is no fallback key, so a missing secret
/// is an error rather than a silently weak default.
#[derive(Clone)]
pub struct SensitiveFieldCipher {
    key: Zeroizing<[u8; 32]>,
}

impl fmt::Debug for SensitiveFieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensitiveFieldCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SensitiveFieldCipher {
    /// Derive a 256-bit key from `secret` with SHA-256.
    pub fn new(secret: &str) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::MissingKey);
        }

        let digest = Sha256::digest(secret.as_bytes());
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(digest.as_slice());

        Ok(Self { key })
    }

    /// Build a cipher from `BULWARK_FIELD_ENCRYPTION_KEY`.
    pub fn from_env() -> Result<Self, CryptoError> {
        let secret =
            Zeroizing::new(field_encryption_key_from_env().ok_or(CryptoError::MissingKey)?);
        Self::new(&secret)
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(self.key.as_slice()).map_err(|_| CryptoError::MissingKey)
    }

    /// Encrypt a value for storage. Empty input is returned unchanged.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CryptoError::Rng(e.to_string()))?;

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CryptoError::Encryption)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(BASE64_STANDARD.encode(sealed))
    }

    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<String>, CryptoError> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt).
    ///
    /// Empty input is returned unchanged. Anything else that is not a sealed
    /// value under this key is an error; no partial plaintext is ever returned.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }

        let sealed = BASE64_STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))?;

        if sealed.len() < MIN_SEALED_LEN {
            return Err(CryptoError::MalformedCiphertext(format!(
                "expected at least {MIN_SEALED_LEN} bytes, got {}",
                sealed.len()
            )));
        }

        let (nonce, body) = sealed.split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            self.cipher()?
                .decrypt(Nonce::from_slice(nonce), body)
                .map_err(|_| CryptoError::Decryption)?,
        );

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| CryptoError::MalformedCiphertext("plaintext is not valid UTF-8".into()))
    }

    pub fn decrypt_opt(&self, ciphertext: Option<&str>) -> Result<Option<String>, CryptoError> {
        ciphertext.map(|c| self.decrypt(c)).transpose()
    }

    /// Whether `value` is already a sealed value under this key.
    ///
    /// Checks the base64 alphabet and minimum length first, then confirms by
    /// authenticating the value, so plaintext that merely looks like base64 is
    /// not mistaken for ciphertext.
    pub fn is_already_encrypted(&self, value: &str) -> bool {
        if value.len() < MIN_ENCODED_LEN || !BASE64_REGEX.is_match(value) {
            return false;
        }

        self.decrypt(value).is_ok()
    }

    /// Partially redact a value for display.
    ///
    /// Keeps the first `visible_chars` characters and replaces each remaining
    /// character with `*`. Values with no more than `visible_chars` characters
    /// become [`MASK_PLACEHOLDER`].
    ///
    /// ```
    /// use bulwark_core::crypto::SensitiveFieldCipher;
    ///
    /// assert_eq!(SensitiveFieldCipher::mask("1234567890", 3), "123*******");
    /// assert_eq!(SensitiveFieldCipher::mask("abc", 3), "****");
    /// ```
    pub fn mask(value: &str, visible_chars: usize) -> String {
        let total = value.chars().count();
        if total <= visible_chars {
            return MASK_PLACEHOLDER.to_string();
        }

        value
            .chars()
            .take(visible_chars)
            .chain(std::iter::repeat_n(MASK_CHAR, total - visible_chars))
            .collect()
    }

    /// Encrypt every sensitive field of `record` that is not already sealed.
    ///
    /// Safe to call repeatedly on the same record.
    pub fn seal<T: SensitiveFields + ?Sized>(&self, record: &mut T) -> Result<(), CryptoError> {
        for field in record.sensitive_fields() {
            if let Some(value) = field.as_mut() {
                if !value.is_empty() && !self.is_already_encrypted(value) {
                    *value = self.encrypt(value)?;
                }
            }
        }
        Ok(())
    }

    /// Decrypt every sensitive field of `record`.
    ///
    /// Either all fields are opened or, on error, the record is left untouched.
    pub fn open<T: SensitiveFields + ?Sized>(&self, record: &mut T) -> Result<(), CryptoError> {
        let mut fields = record.sensitive_fields();
        let opened = fields
            .iter()
            .map(|field| self.decrypt_opt(field.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;

        for (field, value) in fields.iter_mut().zip(opened) {
            **field = value;
        }
        Ok(())
    }
}

/// Records with PII fields that must be encrypted at rest.
///
/// The component persisting such a record receives a [`SensitiveFieldCipher`]
/// through its constructor and calls [`SensitiveFieldCipher::seal`] before
/// writing.
///
/// ```
/// use bulwark_core::crypto::{SensitiveFieldCipher, SensitiveFields};
///
/// struct VetProfile {
///     name: String,
///     license_number: Option<String>,
///     contact_number: Option<String>,
/// }
///
/// impl SensitiveFields for VetProfile {
///     fn sensitive_fields(&mut self) -> Vec<&mut Option<String>> {
///         vec![&mut self.license_number, &mut self.contact_number]
///     }
/// }
///
/// let cipher = SensitiveFieldCipher::new("secret").unwrap();
/// let mut profile = VetProfile {
///     name: "Dr. Ruiz".into(),
///     license_number: Some("VET-99812".into()),
///     contact_number: None,
/// };
/// cipher.seal(&mut profile).unwrap();
/// assert_ne!(profile.license_number.as_deref(), Some("VET-99812"));
/// cipher.open(&mut profile).unwrap();
/// assert_eq!(profile.license_number.as_deref(), Some("VET-99812"));
/// ```
pub trait SensitiveFields {
    fn sensitive_fields(&mut self) -> Vec<&mut Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SensitiveFieldCipher {
        SensitiveFieldCipher::new("test-field-secret").unwrap()
    }

    #[derive(Debug, Default)]
    struct Contact {
        phone: Option<String>,
        tax_id: Option<String>,
    }

    impl SensitiveFields for Contact {
        fn sensitive_fields(&mut self) -> Vec<&mut Option<String>> {
            vec![&mut self.phone, &mut self.tax_id]
        }
    }

    #[test]
    fn test_missing_key_fails_closed() {
        assert!(matches!(
            SensitiveFieldCipher::new(""),
            Err(CryptoError::MissingKey)
        ));
    }

    #[test]
    fn test_round_trip() {
        let cipher = cipher();
        for plaintext in ["0612345678", "ñandú — 東京 🦀", "a", "quote\"and\\slash"] {
            let sealed = cipher.encrypt(plaintext).unwrap();
            assert_ne!(sealed, plaintext);
            assert_eq!(cipher.decrypt(&sealed).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_empty_and_none_pass_through() {
        let cipher = cipher();
        assert_eq!(cipher.encrypt("").unwrap(), "");
        assert_eq!(cipher.decrypt("").unwrap(), "");
        assert_eq!(cipher.encrypt_opt(None).unwrap(), None);
        assert_eq!(cipher.decrypt_opt(None).unwrap(), None);
    }

    #[test]
    fn test_encryption_is_not_deterministic() {
        let cipher = cipher();
        let first = cipher.encrypt("same value").unwrap();
        let second = cipher.encrypt("same value").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_decrypt_rejects_malformed_input() {
        let cipher = cipher();
        assert!(matches!(
            cipher.decrypt("not base64!"),
            Err(CryptoError::MalformedCiphertext(_))
        ));
        assert!(matches!(
            cipher.decrypt("c2hvcnQ="),
            Err(CryptoError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn test_decrypt_rejects_tampering_and_wrong_key() {
        let cipher = cipher();
        let sealed = cipher.encrypt("123-45-6789").unwrap();

        let mut bytes = BASE64_STANDARD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64_STANDARD.encode(bytes);
        assert!(matches!(
            cipher.decrypt(&tampered),
            Err(CryptoError::Decryption)
        ));

        let other = SensitiveFieldCipher::new("another-secret").unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_is_already_encrypted() {
        let cipher = cipher();
        let sealed = cipher.encrypt("0612345678").unwrap();

        assert!(cipher.is_already_encrypted(&sealed));
        assert!(!cipher.is_already_encrypted("0612345678"));
        assert!(!cipher.is_already_encrypted(""));
        // Valid base64 of sufficient length that was never sealed by us
        assert!(!cipher.is_already_encrypted(
            "QUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFB"
        ));
    }

    #[test]
    fn test_mask() {
        assert_eq!(SensitiveFieldCipher::mask("1234567890", 3), "123*******");
        assert_eq!(SensitiveFieldCipher::mask("a@b.com", 2), "a@*****");
        assert_eq!(SensitiveFieldCipher::mask("abc", 3), MASK_PLACEHOLDER);
        assert_eq!(SensitiveFieldCipher::mask("", 0), MASK_PLACEHOLDER);
        assert_eq!(SensitiveFieldCipher::mask("ñandú", 1), "ñ****");
    }

    #[test]
    fn test_seal_is_idempotent() {
        let cipher = cipher();
        let mut contact = Contact {
            phone: Some("0612345678".into()),
            tax_id: Some(String::new()),
        };

        cipher.seal(&mut contact).unwrap();
        let sealed_phone = contact.phone.clone();
        assert!(cipher.is_already_encrypted(sealed_phone.as_deref().unwrap()));
        assert_eq!(contact.tax_id.as_deref(), Some(""));

        cipher.seal(&mut contact).unwrap();
        assert_eq!(contact.phone, sealed_phone);

        cipher.open(&mut contact).unwrap();
        assert_eq!(contact.phone.as_deref(), Some("0612345678"));
    }

    #[test]
    fn test_open_leaves_record_untouched_on_error() {
        let cipher = cipher();
        let sealed = cipher.encrypt("0612345678").unwrap();
        let mut contact = Contact {
            phone: Some(sealed.clone()),
            tax_id: Some("plaintext".into()),
        };

        assert!(cipher.open(&mut contact).is_err());
        assert_eq!(contact.phone, Some(sealed));
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", cipher());
        assert!(debug.contains("REDACTED"));
    }
}
