//! Vulkan backend implementation
//!
//! [`VulkanDevice`] implements [`GraphicsDevice`](crate::render::api::GraphicsDevice)
//! on top of an instance, device and surface created by the window layer.
//! Every object it creates is tracked so leftovers can be destroyed on drop.

/// Conversions between device-facing types and `ash::vk`
mod convert;

/// Host-visible buffers and memory type selection
mod buffer;

/// Descriptor set layouts, pools and writes
mod descriptor_set;

/// Swapchain and swapchain image views
mod swapchain;

/// Render passes, framebuffers and depth images
mod render_pass;

/// Shader modules, pipeline layouts and graphics pipelines
mod pipeline;

/// The device itself
pub mod device;

pub use device::VulkanDevice;

use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(#[from] vk::Result),

    /// Handle unknown to this device
    #[error("Resource not found: {id:#x}")]
    ResourceNotFound {
        /// Raw handle value
        id: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Device setup failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;
