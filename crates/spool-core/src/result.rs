//! Result type aliases for Spool.

use crate::SpoolError;

/// A specialized `Result` type for Spool operations.
pub type SpoolResult<T> = Result<T, SpoolError>;

