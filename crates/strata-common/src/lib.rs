//! StrataDB common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all StrataDB components.

pub mod bitmap;
pub mod config;
pub mod error;
pub mod types;

pub use bitmap::{ConcurrentBitmap, RawBitmap};
pub use config::StorageConfig;
pub use error::{Result, StrataError};
pub use types::{LayoutVersion, Timestamp};
