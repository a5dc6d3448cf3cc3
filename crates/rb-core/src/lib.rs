//! Core types shared across the RedBase engine
//!
//! Provides the building blocks every repository speaks in:
//! - Key metadata (`Key`, `TypeId`)
//! - Binary values with numeric accessors (`Value`)
//! - The stable error taxonomy (`Error`, `Result`)

pub mod error;
pub mod key;
pub mod value;

// Re-export commonly used types
pub use error::{Error, Result};
pub use key::{Key, TypeId};
pub use value::Value;

/// Returns the current time in milliseconds since the Unix epoch.
///
/// All `etime`/`mtime` columns store this representation.
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
