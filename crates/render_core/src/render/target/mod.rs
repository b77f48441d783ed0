//! Render targets
//!
//! A [`RenderTarget`] owns everything that depends on the swapchain: the
//! swapchain itself, the render pass, one framebuffer per swapchain image,
//! and the pipelines drawn into it. On resize it tears the chain down
//! leaf-first and rebuilds it root-first. [`FrameRing`] rotates the
//! frame-in-flight index.

pub mod frame;
pub mod reconstruction;

pub use frame::FrameRing;
pub use reconstruction::{ReconstructOutcome, RenderTarget, RenderTargetDesc, TargetState};

/// Stable reference to a pipeline registered with a [`RenderTarget`]
///
/// The underlying pipeline handle changes on every rebuild; the id does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub u32);
