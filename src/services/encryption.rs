use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use uuid::Uuid;

const NONCE_LEN: usize = 12;

/// AES-256-GCM sealing for captured payloads at rest.
///
/// Each sealed payload is bound to its work item id as associated data, so a
/// ciphertext copied onto another row fails to open.
pub struct PayloadCipher {
    cipher: Aes256Gcm,
}

impl PayloadCipher {
    /// Create from a base64-encoded 32-byte key.
    pub fn new(key_base64: &str) -> Result<Self, EncryptionError> {
        use base64::Engine;
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_base64)
            .map_err(|_| EncryptionError::InvalidKey)?;

        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKey);
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| EncryptionError::InvalidKey)?;

        Ok(Self { cipher })
    }

    /// Seal a payload for `work_item_id`. Output is nonce || ciphertext.
    pub fn seal(&self, work_item_id: Uuid, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: work_item_id.as_bytes(),
                },
            )
            .map_err(|_| EncryptionError::SealFailed)?;

        let mut output = Vec::with_capacity(NONCE_LEN + sealed.len());
        output.extend_from_slice(&nonce);
        output.extend(sealed);
        Ok(output)
    }

    /// Open a payload previously sealed for `work_item_id`.
    pub fn open(&self, work_item_id: Uuid, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if data.len() < NONCE_LEN {
            return Err(EncryptionError::OpenFailed);
        }

        let (nonce_bytes, sealed) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: sealed,
                    aad: work_item_id.as_bytes(),
                },
            )
            .map_err(|_| EncryptionError::OpenFailed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Invalid encryption key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Failed to seal payload")]
    SealFailed,

    #[error("Failed to open payload")]
    OpenFailed,
}
