//! Configuration validation module.
//!
//! Validates every section up front so that a bad setting fails at startup
//! rather than inside a running worker loop.

use crate::{AppConfig, EncryptionStrategy};
use std::fmt;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// Pool size configuration is invalid (min must be <= max).
    InvalidPoolSize { min: u32, max: u32 },
    /// Pool size exceeds maximum allowed.
    PoolSizeTooLarge { value: u32, maximum: u32 },
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// Timeout value must be positive.
    NonPositiveTimeout { name: String, value: u64 },
    /// Table name is not a plain SQL identifier.
    InvalidTableName { value: String },
    /// Queue name cannot be empty.
    EmptyQueueName,
    /// Worker count must be at least one.
    InvalidWorkerCount { value: usize },
    /// Batch ceiling must be at least one.
    InvalidBatchSize { value: u32 },
    /// Memory limit cannot be parsed.
    InvalidMemoryLimit { value: String },
    /// Encryption strategy lacks its key material.
    MissingKeyMaterial { strategy: EncryptionStrategy, field: &'static str },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPoolSize { min, max } => {
                write!(
                    f,
                    "Invalid pool size: min ({}) cannot be greater than max ({})",
                    min, max
                )
            }
            Self::PoolSizeTooLarge { value, maximum } => {
                write!(
                    f,
                    "Pool size {} exceeds maximum allowed ({})",
                    value, maximum
                )
            }
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {} URL: {}", url_type, message)
            }
            Self::NonPositiveTimeout { name, value } => {
                write!(f, "Timeout {} must be positive, got {}", name, value)
            }
            Self::InvalidTableName { value } => {
                write!(
                    f,
                    "Invalid queue table name '{}': only letters, digits and '_' are allowed",
                    value
                )
            }
            Self::EmptyQueueName => write!(f, "Default queue name cannot be empty"),
            Self::InvalidWorkerCount { value } => {
                write!(f, "Worker count must be at least 1, got {}", value)
            }
            Self::InvalidBatchSize { value } => {
                write!(f, "Worker batch size must be at least 1, got {}", value)
            }
            Self::InvalidMemoryLimit { value } => {
                write!(f, "Unknown memory limit '{}'", value)
            }
            Self::MissingKeyMaterial { strategy, field } => {
                write!(f, "Encryption strategy '{}' requires encryption.{}", strategy, field)
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result of configuration validation containing all errors found.
#[derive(Debug)]
pub struct ValidationResult {
    errors: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Creates a new validation result.
    fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Adds an error to the result.
    fn add_error(&mut self, error: ConfigValidationError) {
        self.errors.push(error);
    }

    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the validation errors.
    pub fn errors(&self) -> &[ConfigValidationError] {
        &self.errors
    }

    /// Converts to Result, returning Err with all errors if any exist.
    pub fn into_result(self) -> Result<(), Vec<ConfigValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Maximum connection pool size.
    const MAX_POOL_SIZE: u32 = 1000;

    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut result = ValidationResult::new();

        if config.queue.driver.is_persistent() {
            Self::validate_database(&config.database, &mut result);
        }
        Self::validate_queue(&config.queue, &mut result);
        Self::validate_worker(&config.worker, &mut result);
        Self::validate_encryption(&config.encryption, &mut result);

        result.into_result()
    }

    /// Validates database configuration.
    fn validate_database(config: &crate::DatabaseConfig, result: &mut ValidationResult) {
        match Url::parse(&config.url) {
            Ok(url) if url.scheme() == "mysql" => {}
            Ok(url) => result.add_error(ConfigValidationError::InvalidUrl {
                url_type: "database".to_string(),
                message: format!("unsupported scheme '{}', expected mysql://", url.scheme()),
            }),
            Err(e) => result.add_error(ConfigValidationError::InvalidUrl {
                url_type: "database".to_string(),
                message: e.to_string(),
            }),
        }

        if config.min_connections > config.max_connections {
            result.add_error(ConfigValidationError::InvalidPoolSize {
                min: config.min_connections,
                max: config.max_connections,
            });
        }
        if config.max_connections > Self::MAX_POOL_SIZE {
            result.add_error(ConfigValidationError::PoolSizeTooLarge {
                value: config.max_connections,
                maximum: Self::MAX_POOL_SIZE,
            });
        }

        if config.connect_timeout_secs == 0 {
            result.add_error(ConfigValidationError::NonPositiveTimeout {
                name: "database.connect_timeout_secs".to_string(),
                value: 0,
            });
        }
    }

    /// Validates queue settings.
    fn validate_queue(config: &crate::QueueConfig, result: &mut ValidationResult) {
        if !is_identifier(&config.table) {
            result.add_error(ConfigValidationError::InvalidTableName {
                value: config.table.clone(),
            });
        }

        if config.default_queue.trim().is_empty() {
            result.add_error(ConfigValidationError::EmptyQueueName);
        }

        if config.timeout_secs == 0 {
            result.add_error(ConfigValidationError::NonPositiveTimeout {
                name: "queue.timeout_secs".to_string(),
                value: 0,
            });
        }
    }

    /// Validates worker settings.
    fn validate_worker(config: &crate::WorkerConfig, result: &mut ValidationResult) {
        if config.workers == 0 {
            result.add_error(ConfigValidationError::InvalidWorkerCount { value: 0 });
        }

        if config.max_batch == 0 {
            result.add_error(ConfigValidationError::InvalidBatchSize { value: 0 });
        }

        if let Some(limit) = &config.memory_limit {
            if parse_memory_limit(limit).is_none() {
                result.add_error(ConfigValidationError::InvalidMemoryLimit {
                    value: limit.clone(),
                });
            }
        }
    }

    /// Validates encryption settings.
    fn validate_encryption(config: &crate::EncryptionConfig, result: &mut ValidationResult) {
        match config.strategy {
            EncryptionStrategy::None => {}
            EncryptionStrategy::Aes => {
                if config.key.as_deref().map_or(true, str::is_empty) {
                    result.add_error(ConfigValidationError::MissingKeyMaterial {
                        strategy: config.strategy,
                        field: "key",
                    });
                }
            }
            EncryptionStrategy::Rsa => {
                if config.public_key_path.is_none() && config.private_key_path.is_none() {
                    result.add_error(ConfigValidationError::MissingKeyMaterial {
                        strategy: config.strategy,
                        field: "public_key_path",
                    });
                }
            }
        }
    }
}

/// Returns true if `value` can be spliced into SQL as a table name.
#[must_use]
pub fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 64
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !value.starts_with(|c: char| c.is_ascii_digit())
}

/// Parses a memory ceiling in the `<digits><K|M|G>` shorthand into bytes.
///
/// `"-1"` means "no explicit limit" and maps to 2 GiB.
#[must_use]
pub fn parse_memory_limit(value: &str) -> Option<u64> {
    const UNLIMITED: u64 = 2 * 1024 * 1024 * 1024;

    let value = value.trim();
    if value == "-1" {
        return Some(UNLIMITED);
    }

    let unit = value.chars().last()?;
    let digits = &value[..value.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    let multiplier = match unit {
        'G' => 1024 * 1024 * 1024,
        'M' => 1024 * 1024,
        'K' => 1024,
        _ => return None,
    };

    amount.checked_mul(multiplier)
}

/// Formats validation errors for display.
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    let mut output = String::from("Configuration validation failed:\n");
    for (i, error) in errors.iter().enumerate() {
        output.push_str(&format!("  {}. {}\n", i + 1, error));
    }
    output
}
