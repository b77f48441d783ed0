//! Rendering core
//!
//! GPU resource pools, the material graph and the render-target
//! reconstruction protocol, built on the [`api::GraphicsDevice`] abstraction.
//!
//! ```text
//! MaterialSystem ──► Material (root) ──► SharedStorage ──► UniformBufferPool ──┐
//!        │                 ▲                   │                               ├─► ChunkedObjectPool
//!        │            clones (arena)           └──────► DescriptorSetPool ─────┘
//!        ▼
//!   MaterialInstance ──► DrawBinding ──► RenderTarget (swapchain, pass, framebuffers, pipelines)
//! ```

pub mod api;
pub mod backends;
pub mod material;
pub mod pools;
pub mod target;

use thiserror::Error;

pub use api::{BackendKind, DeviceRef, GraphicsDevice};
pub use material::{
    DirtyFlag, DrawBinding, MaterialCreateInfo, MaterialError, MaterialInstance, MaterialKey,
    MaterialSystem, ShaderType, TextureSource, UniformBufferElement, UniformBufferLayout,
};
pub use pools::{
    ChunkedObjectPool, DescriptorSetObject, DescriptorSetPool, PoolError, PoolSlot,
    UniformBufferObject, UniformBufferPool,
};
pub use target::{
    FrameRing, PipelineId, ReconstructOutcome, RenderTarget, RenderTargetDesc, TargetState,
};

/// Errors produced by the rendering core
///
/// Every construct / acquire / reconstruct entry point returns this type so
/// the driver can decide whether to retry, skip the frame or shut down.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A device call failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// A Vulkan call failed
    #[error(transparent)]
    Vulkan(#[from] crate::render::backends::vulkan::VulkanError),

    /// Pool misuse or invalid pool configuration
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Material lookup or layout error
    #[error(transparent)]
    Material(#[from] MaterialError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// The render target is not in a usable state
    #[error("Render target unavailable: {0}")]
    TargetUnavailable(String),
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
