use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::DeliveryError;

const NONCE_LEN: usize = 12;

/// Server-managed symmetric encryption derived from a master key.
///
/// Payloads are encrypted before the cache write and the same ciphertext is
/// published to the broker, so nothing past this service ever sees the
/// plaintext. Output layout: nonce || ciphertext.
#[derive(Clone)]
pub struct EncryptionService {
    master_key: [u8; 32],
}

impl EncryptionService {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self { master_key }
    }

    fn derive_pair_key(&self, sender_id: Uuid, receiver_id: Uuid) -> [u8; 32] {
        let hk = Hkdf::<Sha256>::new(None, &self.master_key);
        let mut info = [0u8; 32];
        info[..16].copy_from_slice(sender_id.as_bytes());
        info[16..].copy_from_slice(receiver_id.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(&info, &mut key)
            .expect("HKDF expand must succeed for 32 byte output");
        key
    }

    pub fn encrypt(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, DeliveryError> {
        let key = self.derive_pair_key(sender_id, receiver_id);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| DeliveryError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        data: &[u8],
    ) -> Result<Vec<u8>, DeliveryError> {
        if data.len() < NONCE_LEN {
            return Err(DeliveryError::Encryption("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);

        let key = self.derive_pair_key(sender_id, receiver_id);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| DeliveryError::Encryption(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let svc = EncryptionService::new([7u8; 32]);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let ct = svc.encrypt(a, b, b"hello").unwrap();
        assert_ne!(&ct[NONCE_LEN..], b"hello");
        assert_eq!(svc.decrypt(a, b, &ct).unwrap(), b"hello");
    }

    #[test]
    fn test_pair_keys_differ() {
        let svc = EncryptionService::new([7u8; 32]);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let ct = svc.encrypt(a, b, b"hello").unwrap();
        // Decrypting with the reversed pair derives a different key
        assert!(svc.decrypt(b, a, &ct).is_err());
    }

    #[test]
    fn test_rejects_truncated_input() {
        let svc = EncryptionService::new([7u8; 32]);
        let err = svc
            .decrypt(Uuid::new_v4(), Uuid::new_v4(), &[0u8; 4])
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Encryption(_)));
    }
}
