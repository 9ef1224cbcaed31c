//! Error types for StrataDB.

use thiserror::Error;

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors that can occur in StrataDB storage operations.
///
/// Recoverable storage conditions (a full block, a write-write conflict) are
/// reported as boolean or optional results on the operations themselves;
/// this enum carries the conditions that must surface to the caller.
#[derive(Debug, Error)]
pub enum StrataError {
    #[error("block store exhausted: {outstanding} of {capacity} blocks in use")]
    OutOfBlocks { outstanding: usize, capacity: usize },

    #[error("invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_blocks_display() {
        let err = StrataError::OutOfBlocks {
            outstanding: 100,
            capacity: 100,
        };
        assert_eq!(
            err.to_string(),
            "block store exhausted: 100 of 100 blocks in use"
        );
    }

    #[test]
    fn test_invalid_parameter_display() {
        let err = StrataError::InvalidParameter {
            name: "block_store_capacity".to_string(),
            value: "0".to_string(),
        };
        assert_eq!(err.to_string(), "invalid parameter: block_store_capacity = 0");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(StrataError::OutOfBlocks {
                outstanding: 1,
                capacity: 1,
            })
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StrataError>();
    }
}
