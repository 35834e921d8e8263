//! # Configuration
//!
//! Constructor-time settings for every pool, allocator and worker set.
//! Loaded once at startup from TOML; there is no runtime reconfiguration.
//!
//! ```toml
//! [block_pool]
//! block_size = 256
//! block_count = 1024
//! alignment = 16
//!
//! [ring]
//! capacity = 4194304
//! alignment = 256
//!
//! [buddy]
//! total_size = 16777216
//! min_block_size = 256
//!
//! [jobs]
//! queue_capacity = 4096
//! # thread_count = 8   # default: CPU count minus one
//!
//! [render]
//! gpu_budget = 268435456
//! blocks_per_bucket = 16
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Number of workers to use when none is configured: CPU count minus one
/// (the main thread keeps a core), never less than one.
#[must_use]
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map_or(1, |count| count.get().saturating_sub(1))
        .max(1)
}

/// [`FixedBlockPool`](crate::FixedBlockPool) settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockPoolConfig {
    /// Bytes per block.
    pub block_size: usize,
    /// Number of blocks.
    pub block_count: usize,
    /// Block alignment (power of two).
    pub alignment: usize,
}

impl Default for BlockPoolConfig {
    fn default() -> Self {
        Self {
            block_size: 256,
            block_count: 1024,
            alignment: 16,
        }
    }
}

/// [`RingBuffer`](crate::RingBuffer) settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Ring size in bytes (multiple of `alignment`).
    pub capacity: usize,
    /// Allocation alignment (power of two).
    pub alignment: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: 4 * 1024 * 1024,
            alignment: 256,
        }
    }
}

/// [`BuddyAllocator`](crate::BuddyAllocator) settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuddyConfig {
    /// Arena size (power-of-two multiple of `min_block_size`).
    pub total_size: usize,
    /// Order-0 block size (power of two).
    pub min_block_size: usize,
}

impl Default for BuddyConfig {
    fn default() -> Self {
        Self {
            total_size: 16 * 1024 * 1024,
            min_block_size: 256,
        }
    }
}

/// [`ThreadPool`](crate::ThreadPool) / [`JobSystem`](crate::JobSystem) settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Worker threads; `None` means [`default_worker_count`].
    pub thread_count: Option<usize>,
    /// Maximum number of queued jobs.
    pub queue_capacity: usize,
}

impl JobsConfig {
    /// Worker count after applying the default.
    #[must_use]
    pub fn resolved_thread_count(&self) -> usize {
        self.thread_count.unwrap_or_else(default_worker_count)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            thread_count: None,
            queue_capacity: 4096,
        }
    }
}

/// Parallel render system and GPU buffer pool settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Recording workers; `None` means [`default_worker_count`].
    pub worker_count: Option<usize>,
    /// Job queue capacity of the recording pool.
    pub queue_capacity: usize,
    /// Device memory budget for pooled buffers, in bytes.
    pub gpu_budget: u64,
    /// Blocks per size bucket in the buffer pool.
    pub blocks_per_bucket: usize,
}

impl RenderConfig {
    /// Worker count after applying the default.
    #[must_use]
    pub fn resolved_worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(default_worker_count)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            queue_capacity: 1024,
            gpu_budget: 256 * 1024 * 1024,
            blocks_per_bucket: 16,
        }
    }
}

/// Complete substrate configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    /// Block pool section.
    pub block_pool: BlockPoolConfig,
    /// Ring buffer section.
    pub ring: RingConfig,
    /// Buddy allocator section.
    pub buddy: BuddyConfig,
    /// Job system section.
    pub jobs: JobsConfig,
    /// Rendering section.
    pub render: RenderConfig,
}

impl KilnConfig {
    /// Parses and validates a TOML document. Missing sections and keys
    /// take their defaults.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidConfig`] on a parse or validation failure.
    pub fn from_toml_str(source: &str) -> CoreResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| CoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidConfig`] if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            CoreError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks every value the constructors would reject.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidConfig`] naming the first offending key.
    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |message: &str| Err(CoreError::InvalidConfig(message.to_string()));

        let pool = &self.block_pool;
        if !pool.alignment.is_power_of_two() {
            return invalid("block_pool.alignment must be a power of two");
        }
        if pool.block_size == 0 || pool.block_count == 0 {
            return invalid("block_pool.block_size and block_count must be non-zero");
        }

        let ring = &self.ring;
        if !ring.alignment.is_power_of_two() {
            return invalid("ring.alignment must be a power of two");
        }
        if ring.capacity == 0 || ring.capacity % ring.alignment != 0 {
            return invalid("ring.capacity must be a non-zero multiple of ring.alignment");
        }

        let buddy = &self.buddy;
        if !buddy.min_block_size.is_power_of_two() {
            return invalid("buddy.min_block_size must be a power of two");
        }
        if buddy.total_size < buddy.min_block_size
            || buddy.total_size % buddy.min_block_size != 0
            || !(buddy.total_size / buddy.min_block_size).is_power_of_two()
        {
            return invalid("buddy.total_size must be a power-of-two multiple of min_block_size");
        }

        if self.jobs.thread_count == Some(0) {
            return invalid("jobs.thread_count must be greater than zero");
        }
        if self.jobs.queue_capacity == 0 {
            return invalid("jobs.queue_capacity must be greater than zero");
        }

        let render = &self.render;
        if render.worker_count == Some(0) {
            return invalid("render.worker_count must be greater than zero");
        }
        if render.queue_capacity == 0 || render.blocks_per_bucket == 0 {
            return invalid("render.queue_capacity and blocks_per_bucket must be non-zero");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(KilnConfig::default().validate().is_ok());
        assert!(default_worker_count() >= 1);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = KilnConfig::from_toml_str(
            r"
            [block_pool]
            block_size = 512

            [jobs]
            thread_count = 3
            ",
        )
        .unwrap();

        assert_eq!(config.block_pool.block_size, 512);
        assert_eq!(config.block_pool.block_count, 1024);
        assert_eq!(config.jobs.resolved_thread_count(), 3);
        assert_eq!(config.ring, RingConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = KilnConfig::from_toml_str("[ring]\nalignment = 24\n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));

        let err = KilnConfig::from_toml_str("[jobs]\nthread_count = 0\n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));

        let err = KilnConfig::from_toml_str("[buddy]\ntotal_size = 3000\n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = KilnConfig::from_toml_str("[block_pool\n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = KilnConfig::load("/definitely/not/here/kiln.toml").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }
}
