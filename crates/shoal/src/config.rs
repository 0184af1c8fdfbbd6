//! Store configuration parameters.

use crate::error::StoreError;

/// Configuration for [`MassStore`](crate::MassStore).
///
/// Controls block sizing and the block-table bound. Validated at store
/// construction; all values are immutable for the store's lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Elements per block.
    ///
    /// Default: 131_072. Must be at least 1 and below `u32::MAX` — the
    /// all-ones slot value is reserved as the cursor saturation sentinel.
    pub block_capacity: u32,

    /// Maximum number of blocks the store may install.
    ///
    /// Default: 4096. The block table is allocated to this length up front
    /// so that installing a block never reallocates structure shared with
    /// concurrent claims. At the defaults this bounds the store at
    /// 4096 × 131_072 ≈ 5.4e8 elements.
    pub max_blocks: u32,
}

impl StoreConfig {
    /// Default elements per block.
    pub const DEFAULT_BLOCK_CAPACITY: u32 = 131_072;

    /// Default block-table length.
    pub const DEFAULT_MAX_BLOCKS: u32 = 4096;

    /// Create a configuration with the default values.
    pub fn new() -> Self {
        Self {
            block_capacity: Self::DEFAULT_BLOCK_CAPACITY,
            max_blocks: Self::DEFAULT_MAX_BLOCKS,
        }
    }

    /// Create a configuration with the given block capacity and the
    /// default block-table length.
    pub fn with_block_capacity(block_capacity: u32) -> Self {
        Self {
            block_capacity,
            ..Self::new()
        }
    }

    /// Check the configuration invariants.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.block_capacity == 0 {
            return Err(StoreError::InvalidConfig {
                reason: "block_capacity must be at least 1".to_string(),
            });
        }
        if self.block_capacity == u32::MAX {
            return Err(StoreError::InvalidConfig {
                reason: "block_capacity must be below u32::MAX (saturation sentinel)"
                    .to_string(),
            });
        }
        if self.max_blocks == 0 {
            return Err(StoreError::InvalidConfig {
                reason: "max_blocks must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
