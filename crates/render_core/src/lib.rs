//! # Render Core
//!
//! Pooled GPU resource allocation, material instancing and render-target
//! reconstruction for a Vulkan renderer.
//!
//! ## Features
//!
//! - **Chunked Pools**: Uniform buffer slots and descriptor sets handed out from
//!   fixed-size chunks with deterministic addressing and slot reuse
//! - **Material Graph**: Root materials own shared storage; clones share it and
//!   can be released and pruned independently
//! - **Render Targets**: Swapchain, render pass, framebuffers and pipelines torn
//!   down and rebuilt as one unit on resize
//! - **Headless Device**: Every component runs against an in-memory device for
//!   tests and tooling
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use render_core::prelude::*;
//!
//! fn main() -> Result<(), RenderError> {
//!     let device = create_headless_device();
//!     let mut target = RenderTarget::new(device.clone(), RenderTargetDesc::default(), 800, 600)?;
//!     let mut materials = MaterialSystem::with_defaults(device)?;
//!
//!     let layout = Arc::new(
//!         UniformBufferLayout::builder("Surface")
//!             .field("base_color", ShaderType::Vec4)
//!             .build()?,
//!     );
//!     let material = materials.create_material(
//!         MaterialCreateInfo::new("standard", PipelineId(0)).with_uniform(layout),
//!     )?;
//!     let instance = materials.create_instance(material)?;
//!     materials.set_variable(&instance, "base_color", &[1.0f32, 0.5, 0.25, 1.0])?;
//!
//!     let binding = materials.prepare_draw(&instance)?;
//!     assert_eq!(binding.dynamic_offsets.len(), 1);
//!
//!     target.reconstruct(1024, 768)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

pub use render::{RenderError, RenderResult};

/// Common imports for render core users
pub mod prelude {
    pub use crate::{
        core::config::{Config, ConfigError, RenderCoreConfig},
        foundation::logging,
        render::{
            api::{create_headless_device, DeviceRef, GraphicsDevice, GraphicsPipelineDesc},
            DirtyFlag, DrawBinding, FrameRing, MaterialCreateInfo, MaterialError,
            MaterialInstance, MaterialKey, MaterialSystem, PipelineId, ReconstructOutcome,
            RenderError, RenderResult, RenderTarget, RenderTargetDesc, ShaderType, TargetState,
            TextureSource, UniformBufferLayout,
        },
    };
}
