//! # Spool Core
//!
//! Core error types, result aliases and tracing setup shared by every
//! crate of the Spool job queue.

pub mod error;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use result::*;
pub use telemetry::{init_tracing, LoggingConfig};
