//! Queue facade: turns configuration into a ready connector.

use crate::connector::{
    connect_pool, Connector, ConnectorSettings, DatabaseConnector, JobEvents, LoggingEvents,
    MemoryConnector,
};
use crate::error::JobResult;
use spool_config::{AppConfig, DatabaseConfig, EncryptionConfig, QueueDriver};
use spool_crypto::{build_encrypter, Encrypter};
use sqlx::MySqlPool;
use std::sync::Arc;
use tracing::info;

/// Builds connectors from the queue, database and encryption sections.
#[derive(Clone)]
pub struct Queue {
    driver: QueueDriver,
    settings: ConnectorSettings,
    database: DatabaseConfig,
    encryption: EncryptionConfig,
    encrypter: Option<Arc<dyn Encrypter>>,
    events: Arc<dyn JobEvents>,
}

impl Queue {
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        Self {
            driver: config.queue.driver,
            settings: ConnectorSettings::from(&config.queue),
            database: config.database.clone(),
            encryption: config.encryption.clone(),
            encrypter: None,
            events: Arc::new(LoggingEvents),
        }
    }

    /// Uses `encrypter` instead of the one described by configuration.
    #[must_use]
    pub fn with_encrypter(mut self, encrypter: Arc<dyn Encrypter>) -> Self {
        self.encrypter = Some(encrypter);
        self
    }

    /// Sets the hooks attached to every connector.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn JobEvents>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    #[must_use]
    pub fn driver(&self) -> QueueDriver {
        self.driver
    }

    /// Opens the configured backend.
    ///
    /// For the database driver this connects a pool and checks that the
    /// queue table exists.
    pub async fn connect(&self) -> JobResult<Arc<dyn Connector>> {
        match self.driver {
            QueueDriver::Database => {
                let pool = connect_pool(&self.database).await?;
                Ok(Arc::new(self.connect_with_pool(pool).await?))
            }
            QueueDriver::Memory => Ok(Arc::new(self.memory()?)),
        }
    }

    /// Builds a database connector on an existing pool.
    pub async fn connect_with_pool(&self, pool: MySqlPool) -> JobResult<DatabaseConnector> {
        let connector = DatabaseConnector::new(pool, self.settings.clone())?
            .with_encrypter(self.encrypter()?)
            .with_events(self.events.clone());
        connector.ensure_table().await?;

        info!(table = %self.settings.table, "Database queue connector ready");
        Ok(connector)
    }

    /// Builds an in-process connector.
    pub fn memory(&self) -> JobResult<MemoryConnector> {
        let connector = MemoryConnector::new(self.settings.clone())
            .with_encrypter(self.encrypter()?)
            .with_events(self.events.clone());

        info!("In-memory queue connector ready");
        Ok(connector)
    }

    fn encrypter(&self) -> JobResult<Option<Arc<dyn Encrypter>>> {
        match &self.encrypter {
            Some(encrypter) => Ok(Some(encrypter.clone())),
            None => Ok(build_encrypter(&self.encryption)?),
        }
    }
}
