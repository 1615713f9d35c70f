//! AES-128-CCM authenticated encryption.
//!
//! The S2 encapsulation uses CCM with an 8-byte auth tag and a 13-byte
//! nonce (the longest CCM admits with a 2-byte length field). The tag is
//! appended to the ciphertext on the wire.

use aes::Aes128;
use ccm::{
    aead::{Aead, KeyInit, Payload},
    consts::{U13, U8},
    Ccm,
};
use thiserror::Error;

/// Length of the CCM auth tag on the wire.
pub const SECURITY_S2_AUTH_TAG_LENGTH: usize = 8;

/// Length of the CCM nonce.
pub const CCM_NONCE_LENGTH: usize = 13;

/// AES-128-CCM with 8-byte tag and 13-byte nonce.
type Aes128Ccm = Ccm<Aes128, U8, U13>;

/// Errors from the CCM primitive.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptionFailed,

    #[error("authentication failed")]
    AuthenticationFailed,
}

/// Encrypt and authenticate. Returns `ciphertext ∥ tag`.
pub fn encrypt_aes128_ccm(
    key: &[u8; 16],
    iv: &[u8; CCM_NONCE_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes128Ccm::new(key.into());
    cipher
        .encrypt(
            iv.into(),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Verify and decrypt `ciphertext ∥ tag`. Fails on any tag or AAD mismatch.
pub fn decrypt_aes128_ccm(
    key: &[u8; 16],
    iv: &[u8; CCM_NONCE_LENGTH],
    ciphertext_and_tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext_and_tag.len() < SECURITY_S2_AUTH_TAG_LENGTH {
        return Err(CryptoError::AuthenticationFailed);
    }
    let cipher = Aes128Ccm::new(key.into());
    cipher
        .decrypt(
            iv.into(),
            Payload {
                msg: ciphertext_and_tag,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [0x42; 16];
    const IV: [u8; 13] = [0x13; 13];

    #[test]
    fn test_encrypt_decrypt() {
        let plaintext = b"inner command bytes";
        let aad = b"auth data";

        let ct = encrypt_aes128_ccm(&KEY, &IV, plaintext, aad).unwrap();
        assert_eq!(ct.len(), plaintext.len() + SECURITY_S2_AUTH_TAG_LENGTH);

        let pt = decrypt_aes128_ccm(&KEY, &IV, &ct, aad).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn test_empty_plaintext_tag_only() {
        let ct = encrypt_aes128_ccm(&KEY, &IV, &[], b"aad").unwrap();
        assert_eq!(ct.len(), SECURITY_S2_AUTH_TAG_LENGTH);
        assert!(decrypt_aes128_ccm(&KEY, &IV, &ct, b"aad").unwrap().is_empty());
    }

    #[test]
    fn test_tamper_ciphertext_fails() {
        let mut ct = encrypt_aes128_ccm(&KEY, &IV, b"payload", b"aad").unwrap();
        ct[0] ^= 0x01;
        assert!(matches!(
            decrypt_aes128_ccm(&KEY, &IV, &ct, b"aad"),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_tamper_aad_fails() {
        let ct = encrypt_aes128_ccm(&KEY, &IV, b"payload", b"aad").unwrap();
        assert!(decrypt_aes128_ccm(&KEY, &IV, &ct, b"aae").is_err());
    }

    #[test]
    fn test_wrong_nonce_fails() {
        let ct = encrypt_aes128_ccm(&KEY, &IV, b"payload", b"aad").unwrap();
        let other_iv = [0x14; 13];
        assert!(decrypt_aes128_ccm(&KEY, &other_iv, &ct, b"aad").is_err());
    }

    #[test]
    fn test_truncated_input_fails() {
        assert!(decrypt_aes128_ccm(&KEY, &IV, &[0u8; 4], b"").is_err());
    }
}
