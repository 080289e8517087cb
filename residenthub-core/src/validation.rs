//! Field validation for registration and profile updates.

use crate::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LENGTH: usize = 6;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid email regex"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[1-9]\d{0,15}$").expect("Invalid phone regex"));
static APARTMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9\-/]+$").expect("Invalid apartment regex"));

pub fn validate_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Phone numbers are checked with whitespace removed.
pub fn validate_phone(phone: &str) -> bool {
    let compact: String = phone.chars().filter(|c| !c.is_whitespace()).collect();
    PHONE_RE.is_match(&compact)
}

pub fn validate_apartment_number(apartment: &str) -> bool {
    APARTMENT_RE.is_match(apartment)
}

pub fn validate_required(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Password character-class report.
///
/// Only the length rule gates validity; the class flags are informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordCheck {
    pub is_valid: bool,
    pub has_upper_case: bool,
    pub has_lower_case: bool,
    pub has_numbers: bool,
}

pub fn validate_password(password: &str) -> PasswordCheck {
    PasswordCheck {
        is_valid: password.chars().count() >= MIN_PASSWORD_LENGTH,
        has_upper_case: password.chars().any(|c| c.is_ascii_uppercase()),
        has_lower_case: password.chars().any(|c| c.is_ascii_lowercase()),
        has_numbers: password.chars().any(|c| c.is_ascii_digit()),
    }
}

pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Field-level checks below return the first failure as a [`ValidationError`].
pub fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if validate_required(value) {
        Ok(())
    } else {
        Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        })
    }
}

pub fn require_email(field: &str, value: &str) -> Result<(), ValidationError> {
    require(field, value)?;
    if validate_email(value) {
        Ok(())
    } else {
        Err(invalid(field, "Please enter a valid email address"))
    }
}

pub fn require_password(field: &str, value: &str) -> Result<(), ValidationError> {
    if validate_password(value).is_valid {
        Ok(())
    } else {
        Err(invalid(
            field,
            format!("Password must be at least {} characters long", MIN_PASSWORD_LENGTH),
        ))
    }
}

/// Optional fields are valid when absent or blank.
pub fn optional_phone(field: &str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(v) if validate_required(v) && !validate_phone(v) => {
            Err(invalid(field, "Please enter a valid phone number"))
        }
        _ => Ok(()),
    }
}

pub fn optional_apartment(field: &str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(v) if validate_required(v) && !validate_apartment_number(v) => {
            Err(invalid(field, "Please enter a valid apartment number"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_email_rules() {
        assert!(validate_email("resident@society.in"));
        assert!(!validate_email("resident@society"));
        assert!(!validate_email("two words@society.in"));
        assert!(!validate_email(""));
    }

    #[test]
    fn test_phone_ignores_whitespace() {
        assert!(validate_phone("+91 98765 43210"));
        assert!(!validate_phone("0123"));
        assert!(!validate_phone("+"));
    }

    #[test]
    fn test_apartment_rules() {
        assert!(validate_apartment_number("B-204"));
        assert!(validate_apartment_number("T2/1101"));
        assert!(!validate_apartment_number("B 204"));
    }

    #[test]
    fn test_password_length_gate() {
        let weak = validate_password("abc");
        assert!(!weak.is_valid);
        let ok = validate_password("Secret1");
        assert!(ok.is_valid && ok.has_upper_case && ok.has_lower_case && ok.has_numbers);
    }

    #[test]
    fn test_require_email_reports_missing_before_invalid() {
        assert_eq!(
            require_email("email", "  "),
            Err(ValidationError::RequiredFieldMissing {
                field: "email".to_string()
            })
        );
        assert!(matches!(
            require_email("email", "nope"),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_optional_fields_accept_absent() {
        assert!(optional_phone("phone", None).is_ok());
        assert!(optional_phone("phone", Some("")).is_ok());
        assert!(optional_phone("phone", Some("abc")).is_err());
        assert!(optional_apartment("apartmentNumber", Some("A 1")).is_err());
    }

    proptest! {
        #[test]
        fn password_validity_tracks_length(password in "[a-zA-Z0-9]{0,12}") {
            let check = validate_password(&password);
            prop_assert_eq!(check.is_valid, password.len() >= MIN_PASSWORD_LENGTH);
        }

        #[test]
        fn generated_phone_numbers_validate(digits in "[1-9][0-9]{5,12}") {
            let with_plus = format!("+{}", digits);
            prop_assert!(validate_phone(&digits));
            prop_assert!(validate_phone(&with_plus));
        }
    }
}
