//! RSA-OAEP payload encryption.
//!
//! Producers can be configured with only the public key: they encrypt
//! payloads they can no longer read. Consumers hold the private key.

use crate::{CryptoError, CryptoResult, Encrypter};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::fs;
use std::path::Path;
use tracing::debug;

/// OAEP overhead for SHA-256: two digests plus two bytes.
const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;
const CHUNK_SEPARATOR: char = '.';

/// Asymmetric provider using RSA with OAEP/SHA-256 padding.
///
/// Inputs longer than one RSA block are split; each block is encoded on
/// its own and the blocks are joined with `.`.
#[derive(Debug, Clone)]
pub struct RsaEncrypter {
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
}

impl RsaEncrypter {
    /// Creates an encrypt-only provider.
    #[must_use]
    pub fn from_public_key(public: RsaPublicKey) -> Self {
        Self {
            public,
            private: None,
        }
    }

    /// Creates a provider able to encrypt and decrypt.
    #[must_use]
    pub fn from_private_key(private: RsaPrivateKey) -> Self {
        Self {
            public: private.to_public_key(),
            private: Some(private),
        }
    }

    /// Parses PEM text; PKCS#8 and PKCS#1 encodings are accepted.
    pub fn from_pem(public_pem: Option<&str>, private_pem: Option<&str>) -> CryptoResult<Self> {
        let private = private_pem.map(parse_private_key).transpose()?;

        match (public_pem, private) {
            (_, Some(private)) => Ok(Self::from_private_key(private)),
            (Some(public), None) => Ok(Self::from_public_key(parse_public_key(public)?)),
            (None, None) => Err(CryptoError::InvalidKey(
                "RSA needs a public or a private key".to_string(),
            )),
        }
    }

    /// Reads PEM key files from disk.
    pub fn from_pem_files(public_path: Option<&str>, private_path: Option<&str>) -> CryptoResult<Self> {
        let public = public_path.map(read_key_file).transpose()?;
        let private = private_path.map(read_key_file).transpose()?;

        let encrypter = Self::from_pem(public.as_deref(), private.as_deref())?;
        debug!(
            bits = encrypter.public.size() * 8,
            can_decrypt = encrypter.can_decrypt(),
            "RSA keys loaded"
        );
        Ok(encrypter)
    }

    /// Returns true if a private key is available.
    #[must_use]
    pub const fn can_decrypt(&self) -> bool {
        self.private.is_some()
    }

    fn chunk_len(&self) -> CryptoResult<usize> {
        self.public
            .size()
            .checked_sub(OAEP_SHA256_OVERHEAD)
            .filter(|len| *len > 0)
            .ok_or_else(|| CryptoError::InvalidKey("RSA key too small for OAEP/SHA-256".to_string()))
    }
}

impl Encrypter for RsaEncrypter {
    fn encrypt(&self, plain: &str) -> CryptoResult<String> {
        let bytes = plain.as_bytes();
        let chunks: Vec<&[u8]> = if bytes.is_empty() {
            vec![bytes]
        } else {
            bytes.chunks(self.chunk_len()?).collect()
        };

        let mut rng = OsRng;
        let encoded = chunks
            .into_iter()
            .map(|chunk| {
                self.public
                    .encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
                    .map(|block| STANDARD.encode(block))
                    .map_err(|e| CryptoError::Encrypt(e.to_string()))
            })
            .collect::<CryptoResult<Vec<_>>>()?;

        Ok(encoded.join(&CHUNK_SEPARATOR.to_string()))
    }

    fn decrypt(&self, cipher: &str) -> CryptoResult<String> {
        let private = self.private.as_ref().ok_or_else(|| {
            CryptoError::InvalidKey("no RSA private key configured, cannot decrypt".to_string())
        })?;

        let mut plain = Vec::with_capacity(cipher.len());
        for block in cipher.trim().split(CHUNK_SEPARATOR) {
            let block = STANDARD.decode(block)?;
            let chunk = private
                .decrypt(Oaep::new::<Sha256>(), &block)
                .map_err(|e| CryptoError::Decrypt(e.to_string()))?;
            plain.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8(plain)?)
    }

    fn name(&self) -> &'static str {
        "rsa"
    }
}

fn read_key_file(path: &str) -> CryptoResult<String> {
    fs::read_to_string(Path::new(path)).map_err(|source| CryptoError::KeyFile {
        path: path.to_string(),
        source,
    })
}

fn parse_public_key(pem: &str) -> CryptoResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidKey(format!("unreadable RSA public key: {}", e)))
}

fn parse_private_key(pem: &str) -> CryptoResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidKey(format!("unreadable RSA private key: {}", e)))
}
