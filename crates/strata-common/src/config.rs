//! Configuration structures for StrataDB.

use crate::error::{Result, StrataError};
use serde::{Deserialize, Serialize};

/// Storage configuration for the tuple storage core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Maximum number of released blocks the block store keeps for reuse.
    pub block_store_reuse_limit: usize,
    /// Maximum number of blocks the store will hand out at once
    /// (None = bounded only by memory).
    pub block_store_capacity: Option<usize>,
    /// Maximum number of released undo buffer segments kept for reuse.
    pub undo_segment_reuse_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            block_store_reuse_limit: 64,
            block_store_capacity: None,
            undo_segment_reuse_limit: 10_000,
        }
    }
}

impl StorageConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if let Some(capacity) = self.block_store_capacity {
            if capacity == 0 {
                return Err(StrataError::InvalidParameter {
                    name: "block_store_capacity".to_string(),
                    value: "0".to_string(),
                });
            }
            if self.block_store_reuse_limit > capacity {
                return Err(StrataError::InvalidParameter {
                    name: "block_store_reuse_limit".to_string(),
                    value: self.block_store_reuse_limit.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.block_store_reuse_limit, 64);
        assert_eq!(config.block_store_capacity, None);
        assert_eq!(config.undo_segment_reuse_limit, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_storage_config_custom() {
        let config = StorageConfig {
            block_store_reuse_limit: 8,
            block_store_capacity: Some(100),
            undo_segment_reuse_limit: 256,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_capacity() {
        let config = StorageConfig {
            block_store_capacity: Some(0),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, StrataError::InvalidParameter { .. }));
        assert_eq!(err.to_string(), "invalid parameter: block_store_capacity = 0");
    }

    #[test]
    fn test_validate_reuse_limit_above_capacity() {
        let config = StorageConfig {
            block_store_reuse_limit: 10,
            block_store_capacity: Some(5),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_config_clone() {
        let config1 = StorageConfig::default();
        let config2 = config1.clone();
        assert_eq!(
            config1.block_store_reuse_limit,
            config2.block_store_reuse_limit
        );
        assert_eq!(config1.block_store_capacity, config2.block_store_capacity);
    }

    #[test]
    fn test_storage_config_serde_roundtrip() {
        let original = StorageConfig {
            block_store_reuse_limit: 32,
            block_store_capacity: Some(1024),
            undo_segment_reuse_limit: 512,
        };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: StorageConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(
            original.block_store_reuse_limit,
            deserialized.block_store_reuse_limit
        );
        assert_eq!(
            original.block_store_capacity,
            deserialized.block_store_capacity
        );
        assert_eq!(
            original.undo_segment_reuse_limit,
            deserialized.undo_segment_reuse_limit
        );
    }
}
