//! Security keys are not offered yet; every entry point reports `Unsupported`.

use crate::error::AuthError;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct WebauthnService;

impl WebauthnService {
    /// # Errors
    /// Always `Unsupported`.
    pub fn register_begin(&self, _account_id: Uuid) -> Result<(), AuthError> {
        Err(AuthError::Unsupported("webauthn"))
    }

    /// # Errors
    /// Always `Unsupported`.
    pub fn authenticate_begin(&self, _account_id: Uuid) -> Result<(), AuthError> {
        Err(AuthError::Unsupported("webauthn"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn every_entry_point_is_unsupported() {
        let service = WebauthnService;
        let err = service.register_begin(Uuid::nil()).err();
        assert!(matches!(err, Some(AuthError::Unsupported("webauthn"))));
        assert_eq!(
            service.authenticate_begin(Uuid::nil()).err().map(|err| err.kind()),
            Some(ErrorKind::Validation)
        );
    }
}
