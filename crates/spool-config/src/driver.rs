//! Backend and strategy selectors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage backend used by the queue facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueDriver {
    /// Shared MySQL table, claimable by many worker processes.
    #[default]
    Database,
    /// In-process store; only visible to the current process.
    Memory,
}

impl QueueDriver {
    /// Returns true if the driver persists jobs outside the process.
    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        matches!(self, Self::Database)
    }
}

impl fmt::Display for QueueDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database => write!(f, "database"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Payload encryption strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionStrategy {
    /// Payloads travel in clear form.
    #[default]
    None,
    /// Symmetric AES-256-CBC with a shared key.
    Aes,
    /// Asymmetric RSA: producers hold the public key, consumers the private key.
    Rsa,
}

impl EncryptionStrategy {
    /// Returns true if a provider has to be built.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for EncryptionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Aes => write!(f, "aes"),
            Self::Rsa => write!(f, "rsa"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_serde() {
        let driver: QueueDriver = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(driver, QueueDriver::Memory);
        assert!(!driver.is_persistent());
        assert_eq!(QueueDriver::default().to_string(), "database");
    }

    #[test]
    fn test_strategy_enabled() {
        assert!(!EncryptionStrategy::None.is_enabled());
        assert!(EncryptionStrategy::Aes.is_enabled());
        assert_eq!(EncryptionStrategy::Rsa.to_string(), "rsa");
    }
}
