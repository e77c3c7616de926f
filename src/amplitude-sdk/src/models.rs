//! Request and response payloads of the Amplitude ingestion APIs.

use crate::error::ValidationError;

pub mod event;
pub mod group;
pub mod identify;
pub mod response;

/// Amplitude requires at least one of `user_id` and `device_id`. Empty
/// strings count as absent.
pub(crate) fn check_identity(
    user_id: Option<&str>,
    device_id: Option<&str>,
    min_id_length: Option<u32>,
) -> Result<(), ValidationError> {
    let user_id = user_id.filter(|id| !id.is_empty());
    let device_id = device_id.filter(|id| !id.is_empty());

    if user_id.is_none() && device_id.is_none() {
        return Err(ValidationError::MissingIdentity { index: 0 });
    }

    let Some(min) = min_id_length else {
        return Ok(());
    };
    let min_chars = usize::try_from(min).unwrap_or(usize::MAX);

    for (field, id) in [("user_id", user_id), ("device_id", device_id)] {
        if let Some(id) = id {
            if id.chars().count() < min_chars {
                return Err(ValidationError::IdTooShort {
                    index: 0,
                    field,
                    min,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_identity() {
        assert!(check_identity(Some("user"), None, None).is_ok());
        assert!(check_identity(None, Some("device"), None).is_ok());
        assert_eq!(
            check_identity(None, None, None),
            Err(ValidationError::MissingIdentity { index: 0 })
        );
        assert_eq!(
            check_identity(Some(""), Some(""), None),
            Err(ValidationError::MissingIdentity { index: 0 })
        );
    }

    #[test]
    fn test_check_identity_min_length() {
        assert!(check_identity(Some("12345"), None, Some(5)).is_ok());
        assert_eq!(
            check_identity(Some("abcdef"), Some("abc"), Some(5)),
            Err(ValidationError::IdTooShort {
                index: 0,
                field: "device_id",
                min: 5
            })
        );
        // An empty id is absent, not short.
        assert!(check_identity(Some(""), Some("device-1"), Some(5)).is_ok());
    }
}
