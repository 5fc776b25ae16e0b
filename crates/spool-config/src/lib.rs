//! # Spool Config
//!
//! Configuration for Spool queues and workers.
//! Supports layered configuration from files and environment variables,
//! validated once at startup.

mod app_config;
mod driver;
mod loader;
mod validation;

pub use app_config::*;
pub use driver::*;
pub use loader::*;
pub use validation::*;
