//! Encryption error types.

use spool_core::SpoolError;
use thiserror::Error;

/// Errors raised by encryption providers.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key material is missing or malformed.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encrypt(String),

    /// Decryption failed, usually a wrong key or a tampered ciphertext.
    #[error("Decryption failed: {0}")]
    Decrypt(String),

    /// Ciphertext is not in the expected envelope.
    #[error("Malformed ciphertext: {0}")]
    Encoding(String),

    /// Key file could not be read.
    #[error("Failed to read key file {path}: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for encryption operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

impl From<CryptoError> for SpoolError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKey(_) | CryptoError::KeyFile { .. } => {
                Self::Configuration(err.to_string())
            }
            _ => Self::Encryption(err.to_string()),
        }
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Encoding(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for CryptoError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Self::Decrypt(format!("plaintext is not UTF-8: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_errors_are_fatal() {
        let err: SpoolError = CryptoError::InvalidKey("short".to_string()).into();
        assert!(err.is_fatal());

        let err: SpoolError = CryptoError::Decrypt("bad padding".to_string()).into();
        assert_eq!(err.error_code(), "ENCRYPTION_ERROR");
    }
}
