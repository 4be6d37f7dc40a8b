//! Registration field validation.

use crate::engine::RegistrationRequest;
use thiserror::Error;

const MIN_NAME_CHARS: usize = 2;
const NATIONAL_ID_DIGITS: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name must be at least {MIN_NAME_CHARS} characters")]
    Name,
    #[error("surname must be at least {MIN_NAME_CHARS} characters")]
    Surname,
    #[error("national ID must be exactly {NATIONAL_ID_DIGITS} digits")]
    NationalId,
    #[error("contact address must contain '@'")]
    Contact,
    #[error("a face photo is required")]
    MissingPhoto,
}

/// Check every registration field, reporting the first offending one.
///
/// All string fields are trimmed before checking; the national ID must be
/// exactly eight ASCII digits.
pub fn validate_registration(request: &RegistrationRequest) -> Result<(), ValidationError> {
    if request.name.trim().chars().count() < MIN_NAME_CHARS {
        return Err(ValidationError::Name);
    }
    if request.surname.trim().chars().count() < MIN_NAME_CHARS {
        return Err(ValidationError::Surname);
    }

    let national_id = request.national_id.trim();
    if national_id.len() != NATIONAL_ID_DIGITS || !national_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::NationalId);
    }

    if !request.contact.trim().contains('@') {
        return Err(ValidationError::Contact);
    }

    if request.photo.is_empty() {
        return Err(ValidationError::MissingPhoto);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RegistrationRequest {
        RegistrationRequest {
            name: "Ana".into(),
            surname: "Quispe".into(),
            national_id: "12345678".into(),
            contact: "ana@example.com".into(),
            photo: vec![0u8; 16],
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert_eq!(validate_registration(&request()), Ok(()));
    }

    #[test]
    fn test_national_id_must_be_eight_digits() {
        let mut r = request();
        r.national_id = "1234567".into();
        assert_eq!(validate_registration(&r), Err(ValidationError::NationalId));

        r.national_id = "123456789".into();
        assert_eq!(validate_registration(&r), Err(ValidationError::NationalId));

        r.national_id = "1234567a".into();
        assert_eq!(validate_registration(&r), Err(ValidationError::NationalId));

        r.national_id = " 12345678 ".into();
        assert_eq!(validate_registration(&r), Ok(()));
    }

    #[test]
    fn test_name_and_surname_length() {
        let mut r = request();
        r.name = "A".into();
        assert_eq!(validate_registration(&r), Err(ValidationError::Name));

        let mut r = request();
        r.surname = "  B  ".into();
        assert_eq!(validate_registration(&r), Err(ValidationError::Surname));

        let mut r = request();
        r.name = "   ".into();
        assert_eq!(validate_registration(&r), Err(ValidationError::Name));
    }

    #[test]
    fn test_contact_requires_at_sign() {
        let mut r = request();
        r.contact = "ana.example.com".into();
        assert_eq!(validate_registration(&r), Err(ValidationError::Contact));
    }

    #[test]
    fn test_photo_required() {
        let mut r = request();
        r.photo = vec![];
        assert_eq!(validate_registration(&r), Err(ValidationError::MissingPhoto));
    }
}
