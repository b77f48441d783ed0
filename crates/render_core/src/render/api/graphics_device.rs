//! Graphics device abstraction
//!
//! The pools, the material system and the render target only ever talk to the
//! GPU through [`GraphicsDevice`]. A device is shared as an
//! `Arc<dyn GraphicsDevice>` and handed to each component's constructor; there
//! is no process-wide device singleton.
//!
//! Destroy calls cannot fail. Create calls return the handle or a
//! [`RenderError`] that the caller propagates.

use std::sync::Arc;

use crate::render::api::types::{
    BufferDesc, BufferHandle, DescriptorPoolHandle, DescriptorPoolSize, DescriptorSetHandle,
    DescriptorSetLayoutHandle, DescriptorWrite, DeviceLimits, Extent2D, Format, FramebufferDesc,
    FramebufferHandle, GraphicsPipelineDesc, LayoutBinding, PipelineHandle, PipelineLayoutDesc,
    PipelineLayoutHandle, RenderPassDesc, RenderPassHandle, SwapchainDesc, SwapchainHandle,
    SwapchainInfo,
};
use crate::render::RenderResult;

/// Which implementation sits behind a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// ash / Vulkan
    Vulkan,
    /// In-memory device with no GPU
    Headless,
}

/// Shared device reference passed into every component
pub type DeviceRef = Arc<dyn GraphicsDevice>;

/// Explicit graphics API object factory
pub trait GraphicsDevice: Send + Sync {
    /// Backend implementing this device
    fn backend(&self) -> BackendKind;

    /// Limits relevant to uniform buffer packing
    fn limits(&self) -> DeviceLimits;

    /// Block until the device has finished all submitted work
    fn wait_idle(&self) -> RenderResult<()>;

    /// Create a buffer
    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<BufferHandle>;

    /// Copy `data` into a host-visible buffer at `offset`
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()>;

    /// Read `len` bytes back from a host-visible buffer
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, len: usize) -> RenderResult<Vec<u8>>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
    ) -> RenderResult<DescriptorSetLayoutHandle>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);

    /// Create a descriptor pool able to hold `max_sets` sets
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[DescriptorPoolSize],
    ) -> RenderResult<DescriptorPoolHandle>;

    /// Destroy a descriptor pool and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);

    /// Allocate `count` sets of one layout from a pool
    fn allocate_descriptor_sets(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        count: u32,
    ) -> RenderResult<Vec<DescriptorSetHandle>>;

    /// Apply descriptor writes
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);

    /// Create a swapchain (and its image views) for the window surface
    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<SwapchainInfo>;

    /// Destroy a swapchain and its image views
    fn destroy_swapchain(&self, swapchain: SwapchainHandle);

    /// Create a render pass; a color attachment without a fixed format uses
    /// `swapchain_format`
    fn create_render_pass(
        &self,
        desc: &RenderPassDesc,
        swapchain_format: Format,
    ) -> RenderResult<RenderPassHandle>;

    /// Destroy a render pass
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);

    /// Create a framebuffer around one swapchain image
    fn create_framebuffer(&self, desc: &FramebufferDesc) -> RenderResult<FramebufferHandle>;

    /// Destroy a framebuffer and any depth image created for it
    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);

    /// Create a pipeline layout
    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc)
        -> RenderResult<PipelineLayoutHandle>;

    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle);

    /// Create a graphics pipeline with a viewport covering `extent`
    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
        layout: PipelineLayoutHandle,
        render_pass: RenderPassHandle,
        extent: Extent2D,
    ) -> RenderResult<PipelineHandle>;

    /// Destroy a graphics pipeline
    fn destroy_graphics_pipeline(&self, pipeline: PipelineHandle);
}

/// Create a device that needs no GPU
///
/// The Vulkan device needs an instance, device and surface from the window
/// layer and is built with [`crate::render::backends::vulkan::VulkanDevice::new`].
pub fn create_headless_device() -> DeviceRef {
    Arc::new(crate::render::backends::headless::HeadlessDevice::new())
}
