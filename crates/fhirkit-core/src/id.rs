//! FHIR `id` type validation and generation.

use thiserror::Error;

/// A FHIR `id` is restricted to `[A-Za-z0-9\-\.]{1,64}` per the base spec.
const MAX_ID_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("id is empty")]
    Empty,
    #[error("id exceeds {MAX_ID_LEN} characters")]
    TooLong,
    #[error("id contains a character outside [A-Za-z0-9-.]: {0:?}")]
    InvalidCharacter(char),
}

/// Generate a fresh server-assigned id (a UUIDv4, rendered without braces).
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Validate a client-supplied id against the FHIR `id` grammar.
pub fn validate_id(id: &str) -> Result<(), IdError> {
    if id.is_empty() {
        return Err(IdError::Empty);
    }
    if id.len() > MAX_ID_LEN {
        return Err(IdError::TooLong);
    }
    for c in id.chars() {
        if !(c.is_ascii_alphanumeric() || c == '-' || c == '.') {
            return Err(IdError::InvalidCharacter(c));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_ids() {
        assert!(validate_id("example").is_ok());
        assert!(validate_id("abc-123.45").is_ok());
    }

    #[test]
    fn rejects_empty_and_long() {
        assert_eq!(validate_id(""), Err(IdError::Empty));
        let long = "a".repeat(65);
        assert_eq!(validate_id(&long), Err(IdError::TooLong));
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(matches!(
            validate_id("has space"),
            Err(IdError::InvalidCharacter(' '))
        ));
        assert!(matches!(
            validate_id("slash/ok"),
            Err(IdError::InvalidCharacter('/'))
        ));
    }

    #[test]
    fn generated_ids_are_valid() {
        let id = generate_id();
        assert!(validate_id(&id).is_ok());
    }
}
