use super::TotpError;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Seals TOTP seeds at rest.
///
/// Output layout is `nonce (12 bytes) || ciphertext`. The account id and the
/// method id are bound as associated data, so a sealed seed copied onto another
/// row fails to open.
#[derive(Clone)]
pub struct SeedCipher {
    cipher: ChaCha20Poly1305,
}

impl SeedCipher {
    #[must_use]
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Key given as standard base64 of 32 bytes.
    ///
    /// # Errors
    /// Returns an error if the value is not base64 or not 32 bytes long.
    pub fn from_base64(encoded: &SecretString) -> Result<Self, TotpError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.expose_secret().trim())
            .map_err(|_| TotpError::Key)?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| TotpError::Key)?;
        Ok(Self::new(&key))
    }

    /// # Errors
    /// Returns an error if the RNG or the cipher fails.
    pub fn seal(&self, seed: &[u8], account_id: Uuid, method_id: Uuid) -> Result<Vec<u8>, TotpError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|_| TotpError::Cipher)?;

        let aad = associated_data(account_id, method_id);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: seed,
                    aad: &aad,
                },
            )
            .map_err(|_| TotpError::Cipher)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// # Errors
    /// Returns an error if the data is truncated, tampered with, or bound to
    /// another account or method.
    pub fn open(&self, sealed: &[u8], account_id: Uuid, method_id: Uuid) -> Result<Vec<u8>, TotpError> {
        if sealed.len() <= NONCE_LEN {
            return Err(TotpError::Malformed);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let aad = associated_data(account_id, method_id);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| TotpError::Cipher)
    }
}

fn associated_data(account_id: Uuid, method_id: Uuid) -> Vec<u8> {
    format!("totp-seed:v1|{account_id}|{method_id}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn sealed_seed_opens_with_same_binding() -> Result<()> {
        let cipher = SeedCipher::new(&[7u8; 32]);
        let (account, method) = (Uuid::new_v4(), Uuid::new_v4());
        let sealed = cipher.seal(b"12345678901234567890", account, method)?;
        assert_ne!(&sealed[NONCE_LEN..], b"12345678901234567890");
        assert_eq!(cipher.open(&sealed, account, method)?, b"12345678901234567890");
        Ok(())
    }

    #[test]
    fn foreign_binding_or_tampering_fails() -> Result<()> {
        let cipher = SeedCipher::new(&[7u8; 32]);
        let (account, method) = (Uuid::new_v4(), Uuid::new_v4());
        let mut sealed = cipher.seal(b"seed", account, method)?;

        assert!(cipher.open(&sealed, Uuid::new_v4(), method).is_err());
        assert!(cipher.open(&sealed, account, Uuid::new_v4()).is_err());
        assert!(matches!(cipher.open(&sealed[..4], account, method), Err(TotpError::Malformed)));

        if let Some(byte) = sealed.last_mut() {
            *byte ^= 0xFF;
        }
        assert!(cipher.open(&sealed, account, method).is_err());
        Ok(())
    }

    #[test]
    fn key_must_be_32_bytes() {
        let short = SecretString::from(base64::engine::general_purpose::STANDARD.encode([1u8; 16]));
        assert!(matches!(SeedCipher::from_base64(&short), Err(TotpError::Key)));
        let ok = SecretString::from(base64::engine::general_purpose::STANDARD.encode([1u8; 32]));
        assert!(SeedCipher::from_base64(&ok).is_ok());
    }
}
