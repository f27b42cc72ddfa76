//! Validation helpers for DTOs.

use validator::ValidationError;

const ACCESS_CODE_MIN: usize = 4;
const ACCESS_CODE_MAX: usize = 12;
const IDENTIFIER_MAX: usize = 128;

/// Validates a session access code: 4 to 12 upper-case ASCII letters or digits.
///
/// # Examples
///
/// ```ignore
/// validate_access_code("ABC123") // Ok
/// validate_access_code("abc123") // Err - lowercase
/// validate_access_code("AB")     // Err - too short
/// ```
pub fn validate_access_code(code: &str) -> Result<(), ValidationError> {
    if !(ACCESS_CODE_MIN..=ACCESS_CODE_MAX).contains(&code.len()) {
        let mut err = ValidationError::new("access_code_length");
        err.message = Some(
            format!(
                "Access code must be {ACCESS_CODE_MIN} to {ACCESS_CODE_MAX} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        let mut err = ValidationError::new("access_code_format");
        err.message = Some("Access code must contain only A-Z and 0-9".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a user, cookie or connection identifier.
///
/// Identifiers are embedded in store keys and ids, so they must be non-empty, at most 128
/// characters, and free of whitespace and `:`.
pub fn validate_identifier(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.chars().count() > IDENTIFIER_MAX {
        let mut err = ValidationError::new("identifier_length");
        err.message = Some(format!("Identifier must be 1 to {IDENTIFIER_MAX} characters").into());
        return Err(err);
    }

    if id.chars().any(|c| c.is_whitespace() || c == ':') {
        let mut err = ValidationError::new("identifier_format");
        err.message = Some("Identifier must not contain whitespace or ':'".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_access_code_valid() {
        assert!(validate_access_code("ABC123").is_ok());
        assert!(validate_access_code("ROOM").is_ok());
        assert!(validate_access_code("Z9Z9Z9Z9Z9Z9").is_ok());
    }

    #[test]
    fn test_validate_access_code_invalid_length() {
        assert!(validate_access_code("AB1").is_err());
        assert!(validate_access_code("ABCDEFGHJKLMN").is_err());
        assert!(validate_access_code("").is_err());
    }

    #[test]
    fn test_validate_access_code_invalid_format() {
        assert!(validate_access_code("abc123").is_err());
        assert!(validate_access_code("ABC-12").is_err());
        assert!(validate_access_code("ABC 12").is_err());
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("user-42").is_ok());
        assert!(validate_identifier("guest_9f3a").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("with space").is_err());
        assert!(validate_identifier("session:abc").is_err());
        assert!(validate_identifier(&"x".repeat(129)).is_err());
    }
}
