//! Configuration loader with layered sources.

use crate::{format_validation_errors, AppConfig, ConfigValidator};
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use spool_core::SpoolError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Prefix of environment variables that override file settings,
/// e.g. `SPOOL__QUEUE__TABLE=jobs`.
pub const ENV_PREFIX: &str = "SPOOL";

/// Variable naming the active environment profile.
pub const ENVIRONMENT_VAR: &str = "SPOOL_ENVIRONMENT";

/// Where the configuration came from.
#[derive(Debug, Clone)]
enum Source {
    Directory(PathBuf),
    File(PathBuf),
}

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    source: Source,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `{dir}/default.toml` - Default values
    /// 2. `{dir}/{environment}.toml` - Environment-specific overrides
    /// 3. `{dir}/local.toml` - Local overrides
    /// 4. Environment variables with `SPOOL__` prefix
    pub fn new(config_dir: impl Into<PathBuf>) -> Result<Self, SpoolError> {
        let source = Source::Directory(config_dir.into());
        let config = Self::load(&source)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            source,
        })
    }

    /// Loads configuration from a single file, still honouring
    /// environment variable overrides.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, SpoolError> {
        let path = path.into();
        if !path.exists() {
            return Err(SpoolError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let source = Source::File(path);
        let config = Self::load(&source)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            source,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, SpoolError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    ///
    /// Running workers keep the settings they were started with.
    pub async fn reload(&self) -> Result<(), SpoolError> {
        let new_config = Self::load(&self.source)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    fn load(source: &Source) -> Result<AppConfig, SpoolError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let mut builder = Config::builder();
        builder = match source {
            Source::Directory(dir) => Self::add_directory_sources(builder, dir),
            Source::File(path) => {
                debug!("Loading config from: {}", path.display());
                builder.add_source(File::from(path.as_path()).required(true))
            }
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let app_config: AppConfig = builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(config_error_to_spool_error)?;

        Self::validate_config(&app_config)?;

        Ok(app_config)
    }

    fn add_directory_sources(
        mut builder: ConfigBuilder<config::builder::DefaultState>,
        dir: &Path,
    ) -> ConfigBuilder<config::builder::DefaultState> {
        let environment =
            std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string());

        info!(
            "Loading configuration for environment: {} from {}",
            environment,
            dir.display()
        );

        for name in ["default", environment.as_str(), "local"] {
            let path = dir.join(format!("{}.toml", name));
            if path.exists() {
                debug!("Loading {} config from: {}", name, path.display());
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder
    }

    /// Validates the configuration.
    fn validate_config(config: &AppConfig) -> Result<(), SpoolError> {
        if config.app.environment == "production" && !config.encryption.strategy.is_enabled() {
            warn!("Job payloads are stored unencrypted in production");
        }

        ConfigValidator::validate(config)
            .map_err(|errors| SpoolError::Validation(format_validation_errors(&errors)))
    }

    /// Gets a specific configuration value by key path.
    pub async fn get_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let config = self.config.read().await;
        let json = serde_json::to_value(&*config).ok()?;

        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }

        serde_json::from_value(current.clone()).ok()
    }
}

fn config_error_to_spool_error(err: ConfigError) -> SpoolError {
    SpoolError::configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueDriver;
    use std::fs;

    #[tokio::test]
    async fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[queue]\ntable = \"jobs\"\nmax_retries = 7\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("local.toml"),
            "[queue]\nmax_retries = 2\n[worker]\nworkers = 4\n",
        )
        .unwrap();

        let loader = ConfigLoader::new(dir.path()).unwrap();
        let config = loader.get().await;
        assert_eq!(config.queue.table, "jobs");
        assert_eq!(config.queue.max_retries, 2);
        assert_eq!(config.worker.workers, 4);
        assert_eq!(config.queue.default_queue, "default");
    }

    #[tokio::test]
    async fn test_empty_directory_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path()).unwrap();
        let config = loader.get().await;
        assert_eq!(config.queue.table, "queue_jobs");
        assert_eq!(config.worker.max_batch, 50);
    }

    #[tokio::test]
    async fn test_from_file_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool.toml");
        fs::write(&path, "[queue]\ndriver = \"memory\"\n").unwrap();

        let loader = ConfigLoader::from_file(&path).unwrap();
        assert_eq!(loader.get().await.queue.driver, QueueDriver::Memory);

        fs::write(&path, "[queue]\ndriver = \"memory\"\ntimeout_secs = 90\n").unwrap();
        loader.reload().await.unwrap();
        assert_eq!(loader.get().await.queue.timeout_secs, 90);
        assert_eq!(loader.get_value::<u64>("queue.timeout_secs").await, Some(90));
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigLoader::from_file("/nonexistent/spool.toml").err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), "[worker]\nworkers = 0\n").unwrap();

        let err = ConfigLoader::new(dir.path()).err().unwrap();
        assert!(matches!(err, SpoolError::Validation(_)));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Worker count"));
    }
}
