//! AES-256-CBC payload encryption.

use crate::{CryptoError, CryptoResult, Encrypter};
use ::aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::Rng;
use std::fmt;

type Aes256CbcEnc = cbc::Encryptor<::aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<::aes::Aes256>;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const SEPARATOR: &str = "::";
const BASE64_KEY_PREFIX: &str = "base64:";

/// Symmetric provider using AES-256-CBC with PKCS#7 padding.
///
/// Every call draws a fresh IV. The ciphertext is
/// `base64(base64(iv) + "::" + base64(ct))`.
#[derive(Clone)]
pub struct AesEncrypter {
    key: [u8; KEY_LEN],
}

impl AesEncrypter {
    /// Creates a provider from a raw 32-byte key.
    #[must_use]
    pub const fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Creates a provider from configuration text: either exactly 32
    /// characters, or `base64:` followed by 32 encoded bytes.
    pub fn from_key_str(key: &str) -> CryptoResult<Self> {
        let bytes = match key.strip_prefix(BASE64_KEY_PREFIX) {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(|e| CryptoError::InvalidKey(format!("key is not valid base64: {}", e)))?,
            None => key.as_bytes().to_vec(),
        };

        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            CryptoError::InvalidKey(format!(
                "AES-256 needs a {}-byte key, got {} bytes",
                KEY_LEN,
                bytes.len()
            ))
        })?;

        Ok(Self::new(key))
    }
}

impl fmt::Debug for AesEncrypter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesEncrypter").finish_non_exhaustive()
    }
}

impl Encrypter for AesEncrypter {
    fn encrypt(&self, plain: &str) -> CryptoResult<String> {
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill(&mut iv);

        let cipher = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes());

        let inner = format!("{}{}{}", STANDARD.encode(iv), SEPARATOR, STANDARD.encode(cipher));
        Ok(STANDARD.encode(inner))
    }

    fn decrypt(&self, cipher: &str) -> CryptoResult<String> {
        let inner = String::from_utf8(STANDARD.decode(cipher.trim())?)
            .map_err(|_| CryptoError::Encoding("envelope is not UTF-8".to_string()))?;

        let (iv, body) = inner
            .split_once(SEPARATOR)
            .ok_or_else(|| CryptoError::Encoding("missing IV separator".to_string()))?;

        let iv = STANDARD.decode(iv)?;
        let body = STANDARD.decode(body)?;
        if iv.len() != IV_LEN {
            return Err(CryptoError::Encoding(format!(
                "IV must be {} bytes, got {}",
                IV_LEN,
                iv.len()
            )));
        }

        let plain = Aes256CbcDec::new_from_slices(&self.key, &iv)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&body)
            .map_err(|_| CryptoError::Decrypt("bad padding or wrong key".to_string()))?;

        Ok(String::from_utf8(plain)?)
    }

    fn name(&self) -> &'static str {
        "aes"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_round_trip() {
        let encrypter = AesEncrypter::from_key_str(KEY).unwrap();
        let cipher = encrypter.encrypt("alice@example.com").unwrap();
        assert_ne!(cipher, "alice@example.com");
        assert_eq!(encrypter.decrypt(&cipher).unwrap(), "alice@example.com");
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let encrypter = AesEncrypter::from_key_str(KEY).unwrap();
        let a = encrypter.encrypt("same").unwrap();
        let b = encrypter.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_envelope_layout() {
        let encrypter = AesEncrypter::from_key_str(KEY).unwrap();
        let cipher = encrypter.encrypt("x").unwrap();
        let inner = String::from_utf8(STANDARD.decode(cipher).unwrap()).unwrap();
        let (iv, body) = inner.split_once("::").unwrap();
        assert_eq!(STANDARD.decode(iv).unwrap().len(), IV_LEN);
        assert_eq!(STANDARD.decode(body).unwrap().len(), 16);
    }

    #[test]
    fn test_base64_key() {
        let encoded = format!("base64:{}", STANDARD.encode([7u8; 32]));
        let encrypter = AesEncrypter::from_key_str(&encoded).unwrap();
        let cipher = encrypter.encrypt("payload").unwrap();
        assert_eq!(AesEncrypter::new([7u8; 32]).decrypt(&cipher).unwrap(), "payload");
    }

    #[test]
    fn test_short_key_rejected() {
        assert!(matches!(
            AesEncrypter::from_key_str("too-short"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = AesEncrypter::from_key_str(KEY).unwrap().encrypt("secret").unwrap();
        let other = AesEncrypter::new([1u8; 32]);
        match other.decrypt(&cipher) {
            Err(_) => {}
            Ok(plain) => assert_ne!(plain, "secret"),
        }
    }

    #[test]
    fn test_malformed_ciphertext() {
        let encrypter = AesEncrypter::from_key_str(KEY).unwrap();
        assert!(matches!(
            encrypter.decrypt("not base64!"),
            Err(CryptoError::Encoding(_))
        ));
        let no_separator = STANDARD.encode("abc");
        assert!(matches!(
            encrypter.decrypt(&no_separator),
            Err(CryptoError::Encoding(_))
        ));
    }
}
