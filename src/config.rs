//! Construction-time knobs for a [`crate::store::SectorStore`].
//!
//! Mirrors the `*Config` builder pattern used throughout this codebase's
//! other crates: a plain struct with documented defaults, validated at
//! construction rather than deep inside the hot path.

/// Default number of sectors per chunk (§4.2 suggests an order of `10^4`).
pub const DEFAULT_CHUNK_CAPACITY: usize = 1 << 14; // 16384, power of two

/// Default number of pin counters allocated per lazily-created block (§4.6).
pub const DEFAULT_PIN_BLOCK_SIZE: usize = 4096;

/// Default dead-sector ratio above which a maintenance tick defragments (§4.9).
pub const DEFAULT_DEAD_RATIO_THRESHOLD: f64 = 0.25;

/// Construction-time configuration for a [`crate::store::SectorStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    chunk_capacity: usize,
    pin_block_size: usize,
    dead_ratio_threshold: f64,
}

impl StoreConfig {
    /// Starts building a config from the defaults.
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    pub fn pin_block_size(&self) -> usize {
        self.pin_block_size
    }

    pub fn dead_ratio_threshold(&self) -> f64 {
        self.dead_ratio_threshold
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            pin_block_size: DEFAULT_PIN_BLOCK_SIZE,
            dead_ratio_threshold: DEFAULT_DEAD_RATIO_THRESHOLD,
        }
    }
}

/// Builder for [`StoreConfig`].
#[derive(Debug, Default)]
pub struct StoreConfigBuilder {
    chunk_capacity: Option<usize>,
    pin_block_size: Option<usize>,
    dead_ratio_threshold: Option<f64>,
}

impl StoreConfigBuilder {
    pub fn chunk_capacity(mut self, capacity: usize) -> Self {
        self.chunk_capacity = Some(capacity);
        self
    }

    pub fn pin_block_size(mut self, size: usize) -> Self {
        self.pin_block_size = Some(size);
        self
    }

    pub fn dead_ratio_threshold(mut self, threshold: f64) -> Self {
        self.dead_ratio_threshold = Some(threshold);
        self
    }

    /// Finalizes the config, clamping nonsensical inputs rather than
    /// panicking: a misconfigured threshold is a quality-of-service problem,
    /// not a contract violation.
    pub fn build(self) -> StoreConfig {
        let defaults = StoreConfig::default();
        let chunk_capacity = self
            .chunk_capacity
            .filter(|&c| c > 0)
            .unwrap_or(defaults.chunk_capacity);
        let pin_block_size = self
            .pin_block_size
            .filter(|&s| s > 0)
            .unwrap_or(defaults.pin_block_size);
        let dead_ratio_threshold = self
            .dead_ratio_threshold
            .map(|t| t.clamp(0.0, 1.0))
            .unwrap_or(defaults.dead_ratio_threshold);

        StoreConfig {
            chunk_capacity,
            pin_block_size,
            dead_ratio_threshold,
        }
    }
}
