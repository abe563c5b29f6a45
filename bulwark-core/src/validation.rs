use crate::error::ValidationError;

/// Maximum accepted length of a login identifier, matching the storage column.
pub const MAX_IDENTIFIER_LENGTH: usize = 255;

/// Maximum accepted length of a source address (IPv6 with zone id fits easily).
pub const MAX_SOURCE_IP_LENGTH: usize = 64;

/// Validates the identifier a login attempt is made for
///
/// The identifier is whatever the authentication flow uses to name an account
/// (usually an email). It is never checked for existence here, so unknown
/// identifiers are tracked exactly like known ones.
///
/// # Examples
///
/// ```rust
/// use bulwark_core::validation::validate_identifier;
///
/// assert!(validate_identifier("a@b.com").is_ok());
/// assert!(validate_identifier("   ").is_err());
/// ```
pub fn validate_identifier(identifier: &str) -> Result<(), ValidationError> {
    validate_key_part(identifier, "Identifier", MAX_IDENTIFIER_LENGTH)
}

/// Validates a resolved source IP
///
/// Values are not parsed as addresses: ingress may legitimately report `unknown`
/// when no address could be resolved.
pub fn validate_source_ip(ip: &str) -> Result<(), ValidationError> {
    validate_key_part(ip, "Source IP", MAX_SOURCE_IP_LENGTH)
}

fn validate_key_part(value: &str, field: &str, max_len: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(format!("{field} is required")));
    }

    if value.len() > max_len {
        return Err(ValidationError::InvalidField(format!(
            "{field} must be no more than {max_len} characters long"
        )));
    }

    if value.chars().any(char::is_control) {
        return Err(ValidationError::InvalidField(format!(
            "{field} contains control characters"
        )));
    }

    Ok(())
}
