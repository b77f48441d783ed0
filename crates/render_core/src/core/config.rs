//! # Render Core Configuration
//!
//! Sizes for the GPU pools, the material backing store and the swapchain,
//! loadable from TOML or RON through [`Config`].
//!
//! ```toml
//! application_name = "Rusteroids"
//! frames_in_flight = 2
//! enable_validation = true
//!
//! [pools]
//! uniform_chunk_size = 64
//! descriptor_chunk_size = 32
//! min_uniform_alignment = 256
//!
//! [materials]
//! backing_block_size = 65536
//!
//! [swapchain]
//! preferred_image_count = 3
//! vsync = true
//! ```

use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};
use crate::render::pools::MAX_CHUNK_BYTES;

/// Chunk sizes of the GPU object pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Uniform slots per uniform buffer chunk
    pub uniform_chunk_size: u32,
    /// Descriptor sets per descriptor pool chunk
    pub descriptor_chunk_size: u32,
    /// Lower bound on uniform slot alignment; the device limit wins if larger
    pub min_uniform_alignment: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            uniform_chunk_size: 64,
            descriptor_chunk_size: 32,
            min_uniform_alignment: 256,
        }
    }
}

/// Material system settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialConfig {
    /// Bytes per CPU backing block
    pub backing_block_size: usize,
}

impl Default for MaterialConfig {
    fn default() -> Self {
        Self {
            backing_block_size: 65536,
        }
    }
}

/// Swapchain request settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapchainConfig {
    /// Preferred number of swapchain images
    pub preferred_image_count: u32,
    /// FIFO presentation
    pub vsync: bool,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            preferred_image_count: 3,
            vsync: true,
        }
    }
}

/// Top-level render core configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderCoreConfig {
    /// Application name for logs and instance creation
    pub application_name: String,
    /// Frames recorded ahead of the GPU
    pub frames_in_flight: usize,
    /// Pool chunk sizes
    pub pools: PoolConfig,
    /// Material settings
    pub materials: MaterialConfig,
    /// Swapchain settings
    pub swapchain: SwapchainConfig,
    /// Enable validation layers
    pub enable_validation: bool,
}

impl RenderCoreConfig {
    /// Create a configuration with defaults
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            frames_in_flight: 2,
            pools: PoolConfig::default(),
            materials: MaterialConfig::default(),
            swapchain: SwapchainConfig::default(),
            enable_validation: cfg!(debug_assertions),
        }
    }

    /// Set uniform and descriptor chunk sizes
    pub fn with_chunk_sizes(mut self, uniform: u32, descriptor: u32) -> Self {
        self.pools.uniform_chunk_size = uniform;
        self.pools.descriptor_chunk_size = descriptor;
        self
    }

    /// Set frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| Err(ConfigError::Invalid(reason.to_string()));

        if self.frames_in_flight == 0 {
            return invalid("frames_in_flight must be at least 1");
        }
        if self.pools.uniform_chunk_size == 0 || self.pools.descriptor_chunk_size == 0 {
            return invalid("pool chunk sizes must be at least 1");
        }
        if !self.pools.min_uniform_alignment.is_power_of_two() {
            return invalid("min_uniform_alignment must be a power of two");
        }
        let chunk_bytes =
            u64::from(self.pools.uniform_chunk_size) * self.pools.min_uniform_alignment;
        if chunk_bytes > MAX_CHUNK_BYTES {
            return Err(ConfigError::Invalid(format!(
                "uniform chunk of {} slots at {} byte alignment exceeds {} bytes",
                self.pools.uniform_chunk_size, self.pools.min_uniform_alignment, MAX_CHUNK_BYTES
            )));
        }
        if self.materials.backing_block_size < 16 {
            return invalid("backing_block_size must be at least 16 bytes");
        }
        if self.swapchain.preferred_image_count == 0 {
            return invalid("preferred_image_count must be at least 1");
        }
        Ok(())
    }
}

impl Default for RenderCoreConfig {
    fn default() -> Self {
        Self::new("Render Core Application")
    }
}

impl Config for RenderCoreConfig {}
