//! AEAD primitives for the WeChat Pay v3 wire format.
//!
//! The processor encrypts platform certificates and notification resources
//! with AES-256-GCM under the merchant's API v3 key. The base64 ciphertext
//! carries the 16-byte authentication tag appended at the tail, and the
//! `associated_data` field is bound as AAD.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{AppError, Result};

/// AES-256 key size.
pub const KEY_SIZE: usize = 32;

/// GCM nonce size (96 bits).
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size, appended to the ciphertext tail.
pub const TAG_SIZE: usize = 16;

/// Open a base64 `ciphertext || tag` blob with the API v3 key.
pub fn decrypt(
    key: &[u8],
    nonce: &[u8],
    associated_data: &[u8],
    ciphertext_b64: &str,
) -> Result<Vec<u8>> {
    if key.len() != KEY_SIZE {
        return Err(AppError::Internal(format!(
            "AEAD key must be {} bytes, got {}",
            KEY_SIZE,
            key.len()
        )));
    }
    if nonce.len() != NONCE_SIZE {
        return Err(AppError::Signature(format!(
            "AEAD nonce must be {} bytes, got {}",
            NONCE_SIZE,
            nonce.len()
        )));
    }

    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .map_err(|e| AppError::Signature(format!("Invalid ciphertext encoding: {}", e)))?;
    if ciphertext.len() < TAG_SIZE {
        return Err(AppError::Signature(
            "Ciphertext shorter than authentication tag".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| AppError::Internal(format!("Failed to create cipher: {}", e)))?;

    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: &ciphertext,
                aad: associated_data,
            },
        )
        .map_err(|_| AppError::Signature("AEAD decryption failed".to_string()))
}

/// Seal a plaintext the way the processor does. Used by tests and kept next
/// to `decrypt` so the two sides of the format stay in one place.
pub fn encrypt(
    key: &[u8],
    nonce: &[u8],
    associated_data: &[u8],
    plaintext: &[u8],
) -> Result<String> {
    if key.len() != KEY_SIZE {
        return Err(AppError::Internal(format!(
            "AEAD key must be {} bytes, got {}",
            KEY_SIZE,
            key.len()
        )));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| AppError::Internal(format!("Failed to create cipher: {}", e)))?;

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|e| AppError::Internal(format!("AEAD encryption failed: {}", e)))?;

    Ok(BASE64.encode(ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";
    const NONCE: &[u8; 12] = b"unique-nonce";

    #[test]
    fn roundtrip_with_associated_data() {
        let sealed = encrypt(KEY, NONCE, b"transaction", b"{\"ok\":true}").unwrap();
        let opened = decrypt(KEY, NONCE, b"transaction", &sealed).unwrap();
        assert_eq!(opened, b"{\"ok\":true}");
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let sealed = encrypt(KEY, NONCE, b"transaction", b"{\"ok\":true}").unwrap();
        let mut raw = BASE64.decode(&sealed).unwrap();
        raw[0] ^= 0x01;
        let tampered = BASE64.encode(raw);
        assert!(decrypt(KEY, NONCE, b"transaction", &tampered).is_err());
    }

    #[test]
    fn wrong_associated_data_is_rejected() {
        let sealed = encrypt(KEY, NONCE, b"transaction", b"{\"ok\":true}").unwrap();
        assert!(decrypt(KEY, NONCE, b"certificate", &sealed).is_err());
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        assert!(decrypt(KEY, NONCE, b"", "AAAA").is_err());
    }
}
