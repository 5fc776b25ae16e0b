//! # Spool Crypto
//!
//! Payload encryption providers for Spool jobs.
//!
//! A provider turns a plain string into an opaque, ASCII-safe ciphertext
//! and back. Two strategies are available:
//!
//! - [`AesEncrypter`]: symmetric AES-256-CBC with a fresh IV per call
//! - [`RsaEncrypter`]: RSA-OAEP, so producers only need the public key

mod asymmetric;
mod error;
mod symmetric;

pub use asymmetric::RsaEncrypter;
pub use symmetric::AesEncrypter;
pub use error::{CryptoError, CryptoResult};

use spool_config::{EncryptionConfig, EncryptionStrategy};
use std::sync::Arc;
use tracing::info;

/// A payload encryption provider.
pub trait Encrypter: Send + Sync {
    /// Encrypts `plain` into an ASCII-safe ciphertext.
    fn encrypt(&self, plain: &str) -> CryptoResult<String>;

    /// Decrypts a ciphertext produced by [`Encrypter::encrypt`].
    fn decrypt(&self, cipher: &str) -> CryptoResult<String>;

    /// Short name of the strategy, used in logs.
    fn name(&self) -> &'static str;
}

/// Builds the provider selected by `config`.
///
/// Returns `Ok(None)` when encryption is disabled.
pub fn build_encrypter(config: &EncryptionConfig) -> CryptoResult<Option<Arc<dyn Encrypter>>> {
    let encrypter: Arc<dyn Encrypter> = match config.strategy {
        EncryptionStrategy::None => return Ok(None),
        EncryptionStrategy::Aes => {
            let key = config
                .key
                .as_deref()
                .ok_or_else(|| CryptoError::InvalidKey("encryption.key is not set".to_string()))?;
            Arc::new(AesEncrypter::from_key_str(key)?)
        }
        EncryptionStrategy::Rsa => Arc::new(RsaEncrypter::from_pem_files(
            config.public_key_path.as_deref(),
            config.private_key_path.as_deref(),
        )?),
    };

    info!(strategy = encrypter.name(), "Payload encryption enabled");
    Ok(Some(encrypter))
}
