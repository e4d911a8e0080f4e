//! Payload signatures and subscriber secret protection.
//!
//! Signatures are HMAC-SHA1 (RFC 2104 / RFC 3174) rendered as lowercase hex,
//! which is what subscribers expect in `X-Hub-Signature`. Secrets are sealed
//! with AES-256-GCM under a key derived from a passphrase (the callback URL),
//! so a stored secret is only usable together with the callback it was
//! registered for.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{HubError, HubResult};

type HmacSha1 = Hmac<Sha1>;

/// Per-secret random salt mixed into the key derivation.
const SALT_SIZE: usize = 16;

/// Nonce size for AES-256-GCM (96 bits)
const NONCE_SIZE: usize = 12;

pub trait CryptoFunctions: Send + Sync {
    /// Hex encoded HMAC-SHA1 of `content` keyed with `salt`.
    fn hmac_sha1_hex(&self, content: &[u8], salt: &str) -> HubResult<String>;

    /// Encrypt `plaintext` so that only `passphrase` can recover it.
    fn encrypt(&self, plaintext: &str, passphrase: &str) -> HubResult<String>;

    /// Reverse of [`CryptoFunctions::encrypt`].
    fn decrypt(&self, ciphertext: &str, passphrase: &str) -> HubResult<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCryptoFunctions;

impl DefaultCryptoFunctions {
    pub fn new() -> Self {
        Self
    }

    fn derive_key(salt: &[u8], passphrase: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(passphrase.as_bytes());
        let digest = hasher.finalize();

        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        key
    }

    fn cipher(salt: &[u8], passphrase: &str) -> HubResult<Aes256Gcm> {
        let key = Self::derive_key(salt, passphrase);
        Aes256Gcm::new_from_slice(&key)
            .map_err(|e| HubError::crypto(format!("Failed to create cipher: {e}")))
    }
}

impl CryptoFunctions for DefaultCryptoFunctions {
    fn hmac_sha1_hex(&self, content: &[u8], salt: &str) -> HubResult<String> {
        if salt.is_empty() {
            return Err(HubError::validation("HMAC salt must not be empty"));
        }

        let mut mac = <HmacSha1 as Mac>::new_from_slice(salt.as_bytes())
            .map_err(|e| HubError::crypto(format!("Invalid HMAC key: {e}")))?;
        Mac::update(&mut mac, content);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn encrypt(&self, plaintext: &str, passphrase: &str) -> HubResult<String> {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let cipher = Self::cipher(&salt, passphrase)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| HubError::crypto(format!("Encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&salt);
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str, passphrase: &str) -> HubResult<String> {
        let sealed = BASE64
            .decode(ciphertext)
            .map_err(|e| HubError::crypto(format!("Invalid ciphertext base64: {e}")))?;

        if sealed.len() < SALT_SIZE + NONCE_SIZE {
            return Err(HubError::crypto("Ciphertext is too short"));
        }

        let (salt, rest) = sealed.split_at(SALT_SIZE);
        let (nonce_bytes, body) = rest.split_at(NONCE_SIZE);

        let cipher = Self::cipher(salt, passphrase)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|e| HubError::crypto(format!("Decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| HubError::crypto(format!("Invalid UTF-8 in decrypted value: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALLBACK: &str = "https://subscriber.example/callback?id=7";

    #[test]
    fn test_hmac_sha1_known_vector() {
        // RFC 2202 test case 2
        let crypto = DefaultCryptoFunctions::new();
        let digest = crypto
            .hmac_sha1_hex(b"what do ya want for nothing?", "Jefe")
            .unwrap();
        assert_eq!(digest, "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
    }

    #[test]
    fn test_hmac_salt_changes_output() {
        let crypto = DefaultCryptoFunctions::new();
        let a = crypto.hmac_sha1_hex(b"payload", "one").unwrap();
        let b = crypto.hmac_sha1_hex(b"payload", "two").unwrap();
        assert_eq!(a.len(), 40);
        assert_ne!(a, b);
        assert_eq!(a, crypto.hmac_sha1_hex(b"payload", "one").unwrap());
    }

    #[test]
    fn test_hmac_rejects_empty_salt() {
        let crypto = DefaultCryptoFunctions::new();
        assert!(matches!(
            crypto.hmac_sha1_hex(b"payload", ""),
            Err(HubError::Validation(_))
        ));
    }

    #[test]
    fn test_encrypt_decrypt() {
        let crypto = DefaultCryptoFunctions::new();
        for secret in ["s", "my-secret-password", &"x".repeat(200), "ünïcødé 🔑"] {
            let sealed = crypto.encrypt(secret, CALLBACK).unwrap();
            assert_ne!(sealed, secret);
            assert_eq!(crypto.decrypt(&sealed, CALLBACK).unwrap(), secret);
        }
    }

    #[test]
    fn test_encrypt_is_randomized() {
        let crypto = DefaultCryptoFunctions::new();
        let a = crypto.encrypt("secret", CALLBACK).unwrap();
        let b = crypto.encrypt("secret", CALLBACK).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let crypto = DefaultCryptoFunctions::new();
        let sealed = crypto.encrypt("secret", CALLBACK).unwrap();
        assert!(crypto.decrypt(&sealed, "https://other.example/").is_err());
    }

    #[test]
    fn test_garbage_ciphertext_fails() {
        let crypto = DefaultCryptoFunctions::new();
        assert!(crypto.decrypt("not base64!!", CALLBACK).is_err());
        assert!(crypto.decrypt(&BASE64.encode([0u8; 8]), CALLBACK).is_err());
    }
}
