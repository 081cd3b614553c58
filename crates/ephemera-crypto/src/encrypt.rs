use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::codec::ContentCodec;
use crate::keys::ContentKey;

const NONCE_LEN: usize = 12;

/// AES-256-GCM codec. Stored form is base64(nonce || ciphertext).
pub struct SealedCodec {
    cipher: Aes256Gcm,
}

impl SealedCodec {
    pub fn new(key: &ContentKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
        }
    }
}

impl ContentCodec for SealedCodec {
    fn encode(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    fn decode(&self, stored: &str) -> Result<String> {
        let sealed = BASE64.decode(stored)?;
        if sealed.len() < NONCE_LEN {
            return Err(anyhow!("Sealed content too short: {} bytes", sealed.len()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        Ok(String::from_utf8(plaintext)?)
    }

    fn is_encrypted(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_content_hides_plaintext() {
        let codec = SealedCodec::new(&ContentKey::generate());
        let sealed = codec.encode("meet at noon").unwrap();
        assert!(!sealed.contains("noon"));
        assert_eq!(codec.decode(&sealed).unwrap(), "meet at noon");
    }

    #[test]
    fn nonces_differ_per_message() {
        let codec = SealedCodec::new(&ContentKey::generate());
        assert_ne!(codec.encode("same").unwrap(), codec.encode("same").unwrap());
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = SealedCodec::new(&ContentKey::generate()).encode("secret").unwrap();
        let other = SealedCodec::new(&ContentKey::generate());
        assert!(other.decode(&sealed).is_err());
    }

    #[test]
    fn truncated_content_fails() {
        let codec = SealedCodec::new(&ContentKey::generate());
        assert!(codec.decode(&BASE64.encode([1u8; 4])).is_err());
    }
}
