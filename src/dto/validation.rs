//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::config::PIN_LENGTH;

/// Longest accepted display name, in characters.
pub const MAX_NAME_LENGTH: usize = 24;

/// Validates that a display name is non-blank, short enough, and printable.
///
/// # Examples
///
/// ```ignore
/// validate_display_name("Ada")        // Ok
/// validate_display_name("   ")        // Err - blank
/// validate_display_name("a\nb")       // Err - control character
/// ```
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("display_name_blank");
        err.message = Some("Display name must not be blank".into());
        return Err(err);
    }

    if name.chars().count() > MAX_NAME_LENGTH {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!("Display name must be at most {MAX_NAME_LENGTH} characters").into(),
        );
        return Err(err);
    }

    if name.chars().any(char::is_control) {
        let mut err = ValidationError::new("display_name_format");
        err.message = Some("Display name must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a PIN is exactly [`PIN_LENGTH`] ASCII digits.
pub fn validate_pin(pin: &str) -> Result<(), ValidationError> {
    if pin.len() != PIN_LENGTH as usize || !pin.chars().all(|c| c.is_ascii_digit()) {
        let mut err = ValidationError::new("pin_format");
        err.message = Some(format!("PIN must be exactly {PIN_LENGTH} digits").into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_display_name_valid() {
        assert!(validate_display_name("Ada").is_ok());
        assert!(validate_display_name("Team Rocket 2").is_ok());
        assert!(validate_display_name("日本語").is_ok());
    }

    #[test]
    fn test_validate_display_name_invalid() {
        assert!(validate_display_name("").is_err()); // empty
        assert!(validate_display_name("   ").is_err()); // blank
        assert!(validate_display_name(&"x".repeat(25)).is_err()); // too long
        assert!(validate_display_name("a\tb").is_err()); // control char
    }

    #[test]
    fn test_validate_pin() {
        assert!(validate_pin("913862").is_ok());
        assert!(validate_pin("000000").is_ok());
        assert!(validate_pin("91386").is_err()); // too short
        assert!(validate_pin("9138621").is_err()); // too long
        assert!(validate_pin("91386a").is_err()); // non-digit
    }
}
