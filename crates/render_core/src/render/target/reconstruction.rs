//! Swapchain-dependent object chain and its rebuild protocol
//!
//! Dependency order, root first:
//!
//! ```text
//! swapchain (+ image views) ─► render pass ─► framebuffers (one per image)
//!                                   └───────► pipeline layouts ─► pipelines
//! ```
//!
//! Teardown walks the chain leaf-first (framebuffers, pipelines, pipeline
//! layouts, render pass, swapchain) after the device is idle. A rebuild that
//! fails part-way destroys what it created and leaves the target
//! [`TargetState::Invalid`]; the next [`RenderTarget::reconstruct`] starts
//! over from an empty chain.

use std::sync::Arc;

use crate::core::config::RenderCoreConfig;
use crate::render::api::{
    DeviceRef, Extent2D, FramebufferDesc, FramebufferHandle, GraphicsDevice,
    GraphicsPipelineDesc, PipelineHandle, PipelineLayoutHandle, RenderPassDesc, RenderPassHandle,
    SwapchainDesc, SwapchainInfo,
};
use crate::render::material::UniformBufferLayout;
use crate::render::pools::{UniformBufferObject, UniformBufferPool};
use crate::render::target::PipelineId;
use crate::render::{RenderError, RenderResult};

/// Slots per frame-uniform chunk
const FRAME_UNIFORM_CHUNK_SIZE: u32 = 4;

/// Lifecycle state of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetState {
    /// Every object in the chain exists and matches the current extent
    Constructed,
    /// The chain is being destroyed; only observable from inside a rebuild
    TearingDown,
    /// A rebuild failed or the target was destroyed; the chain is empty
    Invalid,
}

/// Result of a [`RenderTarget::reconstruct`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructOutcome {
    /// The chain was rebuilt
    Rebuilt {
        /// Swapchain images after the rebuild
        image_count: u32,
        /// Whether the image count differs from before the rebuild
        image_count_changed: bool,
    },
    /// The requested extent was zero (minimized window); nothing was touched
    Deferred,
}

/// How to build a render target
#[derive(Debug, Clone)]
pub struct RenderTargetDesc {
    /// Render pass layout, reused unchanged on every rebuild
    pub render_pass: RenderPassDesc,
    /// Preferred number of swapchain images
    pub preferred_image_count: u32,
    /// FIFO presentation
    pub vsync: bool,
    /// Per-image uniform block mirrored on the CPU, if any
    pub frame_uniform_layout: Option<Arc<UniformBufferLayout>>,
}

impl RenderTargetDesc {
    /// Forward pass with the swapchain settings from `config`
    pub fn from_config(config: &RenderCoreConfig) -> Self {
        Self {
            render_pass: RenderPassDesc::forward(),
            preferred_image_count: config.swapchain.preferred_image_count,
            vsync: config.swapchain.vsync,
            frame_uniform_layout: None,
        }
    }

    /// Attach a per-image uniform block
    pub fn with_frame_uniforms(mut self, layout: Arc<UniformBufferLayout>) -> Self {
        self.frame_uniform_layout = Some(layout);
        self
    }
}

impl Default for RenderTargetDesc {
    fn default() -> Self {
        Self::from_config(&RenderCoreConfig::default())
    }
}

#[derive(Debug, Default)]
struct Chain {
    swapchain: Option<SwapchainInfo>,
    render_pass: Option<RenderPassHandle>,
    framebuffers: Vec<FramebufferHandle>,
    pipeline_layouts: Vec<PipelineLayoutHandle>,
    pipelines: Vec<PipelineHandle>,
}

impl Chain {
    fn is_empty(&self) -> bool {
        self.swapchain.is_none()
            && self.render_pass.is_none()
            && self.framebuffers.is_empty()
            && self.pipeline_layouts.is_empty()
            && self.pipelines.is_empty()
    }

    // Leaf-first.
    fn destroy(&mut self, device: &dyn GraphicsDevice) {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }
        for pipeline in self.pipelines.drain(..) {
            device.destroy_graphics_pipeline(pipeline);
        }
        for layout in self.pipeline_layouts.drain(..) {
            device.destroy_pipeline_layout(layout);
        }
        if let Some(render_pass) = self.render_pass.take() {
            device.destroy_render_pass(render_pass);
        }
        if let Some(swapchain) = self.swapchain.take() {
            device.destroy_swapchain(swapchain.handle);
        }
    }
}

/// One uniform slot and CPU mirror per swapchain image
struct FrameUniforms {
    pool: UniformBufferPool,
    slots: Vec<UniformBufferObject>,
    mirrors: Vec<Vec<u8>>,
}

impl FrameUniforms {
    /// Empty set of frame uniforms, if `desc` asks for them
    fn from_desc(device: &DeviceRef, desc: &RenderTargetDesc) -> RenderResult<Option<Self>> {
        let Some(layout) = &desc.frame_uniform_layout else {
            return Ok(None);
        };
        Ok(Some(Self {
            pool: UniformBufferPool::new(
                Arc::clone(device),
                Arc::clone(layout),
                FRAME_UNIFORM_CHUNK_SIZE,
                0,
            )?,
            slots: Vec::new(),
            mirrors: Vec::new(),
        }))
    }

    /// Match `image_count` and re-upload every mirror
    fn resize(&mut self, image_count: usize) -> RenderResult<()> {
        while self.slots.len() > image_count {
            if let Some(slot) = self.slots.pop() {
                self.pool.release(&slot)?;
            }
            self.mirrors.pop();
        }
        let size = self.pool.layout().size() as usize;
        while self.slots.len() < image_count {
            self.slots.push(self.pool.acquire()?);
            self.mirrors.push(vec![0; size]);
        }
        for (slot, mirror) in self.slots.iter().zip(&self.mirrors) {
            self.pool.write(slot, mirror)?;
        }
        Ok(())
    }
}

/// Swapchain, render pass, framebuffers and pipelines of one window
pub struct RenderTarget {
    device: DeviceRef,
    desc: RenderTargetDesc,
    pipelines: Vec<GraphicsPipelineDesc>,
    chain: Chain,
    frame_uniforms: Option<FrameUniforms>,
    state: TargetState,
    extent: Extent2D,
    generation: u64,
}

impl RenderTarget {
    /// Build the chain for a `width` x `height` window
    pub fn new(device: DeviceRef, desc: RenderTargetDesc, width: u32, height: u32) -> RenderResult<Self> {
        let extent = Extent2D::new(width, height);
        if extent.is_empty() {
            return Err(RenderError::TargetUnavailable(format!(
                "cannot construct a render target of {width}x{height}"
            )));
        }

        let frame_uniforms = FrameUniforms::from_desc(&device, &desc)?;

        let mut target = Self {
            device,
            desc,
            pipelines: Vec::new(),
            chain: Chain::default(),
            frame_uniforms,
            state: TargetState::Invalid,
            extent,
            generation: 0,
        };
        target.build(extent)?;
        log::debug!(
            "Render target created: {}x{}, {} images",
            target.extent.width,
            target.extent.height,
            target.image_count()
        );
        Ok(target)
    }

    /// Rebuild the chain for a new window size
    ///
    /// A zero extent defers the rebuild and leaves everything as it is. Any
    /// other call waits for the device to go idle, destroys the whole chain
    /// and creates it again; on failure the target is left `Invalid`.
    pub fn reconstruct(&mut self, width: u32, height: u32) -> RenderResult<ReconstructOutcome> {
        let extent = Extent2D::new(width, height);
        if extent.is_empty() {
            log::warn!("Deferring render target rebuild for {}x{} extent", width, height);
            return Ok(ReconstructOutcome::Deferred);
        }

        log::info!("Reconstructing render target at {}x{}...", width, height);
        self.device.wait_idle()?;

        let previous_image_count = self.image_count();
        self.state = TargetState::TearingDown;
        self.chain.destroy(self.device.as_ref());
        self.build(extent)?;

        let image_count = self.image_count();
        log::info!("Render target reconstruction complete ({} images)", image_count);
        Ok(ReconstructOutcome::Rebuilt {
            image_count,
            image_count_changed: image_count != previous_image_count,
        })
    }

    /// Add a pipeline drawn into this target
    ///
    /// The pipeline is created right away if the target is constructed, and
    /// recreated on every rebuild.
    pub fn register_pipeline(&mut self, desc: GraphicsPipelineDesc) -> RenderResult<PipelineId> {
        let id = PipelineId(self.pipelines.len() as u32);
        if self.state == TargetState::Constructed {
            let render_pass = self.render_pass()?;
            let layout = self.device.create_pipeline_layout(&desc.layout_desc())?;
            match self
                .device
                .create_graphics_pipeline(&desc, layout, render_pass, self.extent)
            {
                Ok(pipeline) => {
                    self.chain.pipeline_layouts.push(layout);
                    self.chain.pipelines.push(pipeline);
                }
                Err(e) => {
                    log::error!("Failed to create pipeline '{}': {}", desc.name, e);
                    self.device.destroy_pipeline_layout(layout);
                    return Err(e);
                }
            }
        }
        log::debug!("Registered pipeline '{}' as {:?}", desc.name, id);
        self.pipelines.push(desc);
        Ok(id)
    }

    /// Overwrite the start of image `image`'s frame uniform block
    pub fn write_frame_uniform(&mut self, image: usize, bytes: &[u8]) -> RenderResult<()> {
        self.require_constructed()?;
        let uniforms = self.frame_uniforms.as_mut().ok_or_else(|| {
            RenderError::TargetUnavailable("render target has no frame uniforms".to_string())
        })?;
        let (Some(slot), Some(mirror)) = (uniforms.slots.get(image), uniforms.mirrors.get_mut(image))
        else {
            return Err(RenderError::TargetUnavailable(format!(
                "no frame uniform for image {image}"
            )));
        };
        uniforms.pool.write(slot, bytes)?;
        mirror[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// CPU mirror of image `image`'s frame uniform block
    pub fn frame_uniform_data(&self, image: usize) -> Option<&[u8]> {
        self.frame_uniforms
            .as_ref()?
            .mirrors
            .get(image)
            .map(Vec::as_slice)
    }

    /// Uniform slot of image `image`'s frame uniform block
    pub fn frame_uniform(&self, image: usize) -> Option<&UniformBufferObject> {
        self.frame_uniforms.as_ref()?.slots.get(image)
    }

    /// Framebuffer of swapchain image `image`
    pub fn framebuffer(&self, image: usize) -> RenderResult<FramebufferHandle> {
        self.require_constructed()?;
        self.chain.framebuffers.get(image).copied().ok_or_else(|| {
            RenderError::TargetUnavailable(format!("no framebuffer for image {image}"))
        })
    }

    /// Current pipeline handle of `id`
    pub fn pipeline(&self, id: PipelineId) -> RenderResult<PipelineHandle> {
        self.require_constructed()?;
        self.chain
            .pipelines
            .get(id.0 as usize)
            .copied()
            .ok_or_else(|| RenderError::TargetUnavailable(format!("unknown pipeline {id:?}")))
    }

    /// Current pipeline layout of `id`
    pub fn pipeline_layout(&self, id: PipelineId) -> RenderResult<PipelineLayoutHandle> {
        self.require_constructed()?;
        self.chain
            .pipeline_layouts
            .get(id.0 as usize)
            .copied()
            .ok_or_else(|| RenderError::TargetUnavailable(format!("unknown pipeline {id:?}")))
    }

    /// Current render pass
    pub fn render_pass(&self) -> RenderResult<RenderPassHandle> {
        self.require_constructed()?;
        self.chain
            .render_pass
            .ok_or_else(|| RenderError::TargetUnavailable("no render pass".to_string()))
    }

    /// Current swapchain, if the chain exists
    pub fn swapchain(&self) -> Option<SwapchainInfo> {
        self.chain.swapchain
    }

    /// Number of swapchain images (0 when invalid)
    pub fn image_count(&self) -> u32 {
        self.chain.framebuffers.len() as u32
    }

    /// Extent of the last successful build
    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    /// Lifecycle state
    pub fn state(&self) -> TargetState {
        self.state
    }

    /// Number of successful builds so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Registered pipelines, indexed by [`PipelineId`]
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Tear the chain down and drop the frame uniforms
    ///
    /// A later [`Self::reconstruct`] builds both again.
    pub fn destroy(&mut self) {
        if !self.chain.is_empty() {
            if let Err(e) = self.device.wait_idle() {
                log::warn!("wait_idle failed while destroying render target: {}", e);
            }
            self.chain.destroy(self.device.as_ref());
            log::debug!("Render target destroyed");
        }
        self.frame_uniforms = None;
        self.state = TargetState::Invalid;
    }

    fn require_constructed(&self) -> RenderResult<()> {
        match self.state {
            TargetState::Constructed => Ok(()),
            state => Err(RenderError::TargetUnavailable(format!(
                "render target is {state:?}"
            ))),
        }
    }

    fn build(&mut self, extent: Extent2D) -> RenderResult<()> {
        let mut chain = Chain::default();
        let result = self
            .create_chain(&mut chain, extent)
            .and_then(|()| self.resize_frame_uniforms(chain.framebuffers.len()));

        match result {
            Ok(()) => {
                if let Some(swapchain) = chain.swapchain {
                    self.extent = swapchain.extent;
                }
                self.chain = chain;
                self.state = TargetState::Constructed;
                self.generation += 1;
                Ok(())
            }
            Err(e) => {
                log::error!("Render target build failed: {}", e);
                chain.destroy(self.device.as_ref());
                self.state = TargetState::Invalid;
                Err(e)
            }
        }
    }

    fn resize_frame_uniforms(&mut self, image_count: usize) -> RenderResult<()> {
        if self.frame_uniforms.is_none() {
            self.frame_uniforms = FrameUniforms::from_desc(&self.device, &self.desc)?;
        }
        match &mut self.frame_uniforms {
            Some(uniforms) => uniforms.resize(image_count),
            None => Ok(()),
        }
    }

    // Root-first; everything created is recorded in `chain` so a failure can
    // be unwound by the caller.
    fn create_chain(&self, chain: &mut Chain, extent: Extent2D) -> RenderResult<()> {
        let device = self.device.as_ref();

        let swapchain = device.create_swapchain(&SwapchainDesc {
            extent,
            preferred_image_count: self.desc.preferred_image_count,
            vsync: self.desc.vsync,
        })?;
        chain.swapchain = Some(swapchain);

        let render_pass = device.create_render_pass(&self.desc.render_pass, swapchain.format)?;
        chain.render_pass = Some(render_pass);

        let depth_format = self.desc.render_pass.depth.map(|depth| depth.format);
        for image_index in 0..swapchain.image_count {
            chain.framebuffers.push(device.create_framebuffer(&FramebufferDesc {
                render_pass,
                swapchain: swapchain.handle,
                image_index,
                extent: swapchain.extent,
                depth_format,
            })?);
        }

        for desc in &self.pipelines {
            chain
                .pipeline_layouts
                .push(device.create_pipeline_layout(&desc.layout_desc())?);
        }
        for (desc, &layout) in self.pipelines.iter().zip(&chain.pipeline_layouts) {
            chain.pipelines.push(device.create_graphics_pipeline(
                desc,
                layout,
                render_pass,
                swapchain.extent,
            )?);
        }
        Ok(())
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("state", &self.state)
            .field("extent", &self.extent)
            .field("generation", &self.generation)
            .field("chain", &self.chain)
            .field("pipelines", &self.pipelines.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::{CullMode, Format};
    use crate::render::backends::headless::{DeviceEvent, HeadlessDevice, ResourceKind};
    use crate::render::material::ShaderType;

    fn pipeline_desc(name: &str) -> GraphicsPipelineDesc {
        GraphicsPipelineDesc {
            name: name.to_string(),
            vertex_spirv: Arc::from(vec![0x0723_0203u32, 1]),
            fragment_spirv: Arc::from(vec![0x0723_0203u32, 2]),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            set_layouts: Vec::new(),
            push_constant_size: 0,
            cull_mode: CullMode::Back,
            depth_test: true,
            blend: false,
        }
    }

    fn target(device: &Arc<HeadlessDevice>) -> RenderTarget {
        let mut target = RenderTarget::new(device.clone(), RenderTargetDesc::default(), 800, 600).unwrap();
        target.register_pipeline(pipeline_desc("forward")).unwrap();
        target
    }

    const CHAIN_KINDS: [ResourceKind; 5] = [
        ResourceKind::Swapchain,
        ResourceKind::RenderPass,
        ResourceKind::Framebuffer,
        ResourceKind::PipelineLayout,
        ResourceKind::Pipeline,
    ];

    #[test]
    fn test_reconstruction_is_idempotent() {
        let device = Arc::new(HeadlessDevice::new());
        let mut target = target(&device);

        let first = target.reconstruct(1024, 768).unwrap();
        let framebuffers = device.live_count(ResourceKind::Framebuffer);
        let second = target.reconstruct(1024, 768).unwrap();

        assert_eq!(
            first,
            ReconstructOutcome::Rebuilt {
                image_count: 3,
                image_count_changed: false
            }
        );
        assert_eq!(second, first);
        assert_eq!(device.live_count(ResourceKind::Framebuffer), framebuffers);
        assert_eq!(target.extent(), Extent2D::new(1024, 768));
        for kind in CHAIN_KINDS {
            let live = device.live_count(kind);
            assert_eq!(device.created_count(kind) - device.destroyed_count(kind), live);
        }
        assert_eq!(device.live_count(ResourceKind::Pipeline), 1);
        assert_eq!(device.invalid_operation_count(), 0);
    }

    #[test]
    fn test_teardown_is_leaf_first_and_rebuild_root_first() {
        let device = Arc::new(HeadlessDevice::new());
        device.set_image_count(2);
        let mut target = target(&device);
        device.clear_events();

        target.reconstruct(640, 480).unwrap();

        let kinds: Vec<_> = device
            .events()
            .into_iter()
            .map(|event| match event {
                DeviceEvent::WaitIdle => None,
                DeviceEvent::Created(kind, _) => Some((true, kind)),
                DeviceEvent::Destroyed(kind, _) => Some((false, kind)),
            })
            .collect();
        use ResourceKind::*;
        let expected = vec![
            None,
            Some((false, Framebuffer)),
            Some((false, Framebuffer)),
            Some((false, Pipeline)),
            Some((false, PipelineLayout)),
            Some((false, RenderPass)),
            Some((false, ImageView)),
            Some((false, ImageView)),
            Some((false, Swapchain)),
            Some((true, Swapchain)),
            Some((true, ImageView)),
            Some((true, ImageView)),
            Some((true, RenderPass)),
            Some((true, Framebuffer)),
            Some((true, Framebuffer)),
            Some((true, PipelineLayout)),
            Some((true, Pipeline)),
        ];
        assert_eq!(kinds, expected);
    }

    #[test]
    fn test_zero_extent_defers() {
        let device = Arc::new(HeadlessDevice::new());
        let mut target = target(&device);
        let live = device.total_live();

        assert_eq!(target.reconstruct(0, 600).unwrap(), ReconstructOutcome::Deferred);
        assert_eq!(target.state(), TargetState::Constructed);
        assert_eq!(device.total_live(), live);
        assert_eq!(device.wait_idle_count(), 0);
        assert!(RenderTarget::new(device.clone(), RenderTargetDesc::default(), 0, 0).is_err());
    }

    #[test]
    fn test_failed_rebuild_leaves_target_invalid_without_leaks() {
        let device = Arc::new(HeadlessDevice::new());
        let mut target = target(&device);
        device.fail_after(ResourceKind::Framebuffer, 1);

        assert!(target.reconstruct(1280, 720).is_err());
        assert_eq!(target.state(), TargetState::Invalid);
        assert_eq!(target.image_count(), 0);
        assert!(target.framebuffer(0).is_err());
        assert!(target.pipeline(PipelineId(0)).is_err());
        for kind in CHAIN_KINDS {
            assert_eq!(device.live_count(kind), 0, "{kind:?} leaked");
        }

        let outcome = target.reconstruct(1280, 720).unwrap();
        assert_eq!(
            outcome,
            ReconstructOutcome::Rebuilt {
                image_count: 3,
                image_count_changed: true
            }
        );
        assert_eq!(target.state(), TargetState::Constructed);
        assert!(target.pipeline(PipelineId(0)).is_ok());
    }

    #[test]
    fn test_pipeline_registered_while_invalid_is_built_on_rebuild() {
        let device = Arc::new(HeadlessDevice::new());
        let mut target = target(&device);
        device.fail_next(ResourceKind::Swapchain);
        assert!(target.reconstruct(800, 600).is_err());

        let id = target.register_pipeline(pipeline_desc("overlay")).unwrap();
        assert_eq!(id, PipelineId(1));
        assert_eq!(device.live_count(ResourceKind::Pipeline), 0);

        target.reconstruct(800, 600).unwrap();
        assert_eq!(device.live_count(ResourceKind::Pipeline), 2);
        assert_ne!(target.pipeline(PipelineId(0)).unwrap(), target.pipeline(id).unwrap());
    }

    #[test]
    fn test_frame_uniforms_follow_image_count() {
        let device = Arc::new(HeadlessDevice::new());
        let layout = Arc::new(
            UniformBufferLayout::builder("Frame")
                .field("view_projection", ShaderType::Mat4)
                .field("time", ShaderType::Float)
                .build()
                .unwrap(),
        );
        let desc = RenderTargetDesc::default().with_frame_uniforms(layout);
        let mut target = RenderTarget::new(device.clone(), desc, 800, 600).unwrap();
        assert!(target.frame_uniform(2).is_some());

        target.write_frame_uniform(1, bytemuck::bytes_of(&[1.0f32; 16])).unwrap();

        device.set_image_count(2);
        let outcome = target.reconstruct(800, 600).unwrap();
        assert_eq!(
            outcome,
            ReconstructOutcome::Rebuilt {
                image_count: 2,
                image_count_changed: true
            }
        );
        assert!(target.frame_uniform(2).is_none());

        let slot = target.frame_uniform(1).unwrap().clone();
        let uploaded = device.read_buffer(slot.buffer, slot.offset, 64).unwrap();
        assert_eq!(uploaded, bytemuck::bytes_of(&[1.0f32; 16]));
        assert_eq!(target.frame_uniform_data(1).map(|data| data.len()), Some(80));
    }

    #[test]
    fn test_surface_format_change_is_picked_up() {
        let device = Arc::new(HeadlessDevice::new());
        let mut target = target(&device);
        device.set_surface_format(Format::Rgba16Float);

        target.reconstruct(800, 600).unwrap();
        assert_eq!(target.swapchain().map(|s| s.format), Some(Format::Rgba16Float));
        assert_eq!(target.generation(), 2);
    }

    #[test]
    fn test_rebuild_after_destroy_restores_frame_uniforms() {
        let device = Arc::new(HeadlessDevice::new());
        let layout = Arc::new(
            UniformBufferLayout::builder("Frame")
                .field("time", ShaderType::Float)
                .build()
                .unwrap(),
        );
        let desc = RenderTargetDesc::default().with_frame_uniforms(layout);
        let mut target = RenderTarget::new(device.clone(), desc, 320, 240).unwrap();

        target.destroy();
        assert_eq!(device.total_live(), 0);
        assert!(target.frame_uniform(0).is_none());
        assert!(target.write_frame_uniform(0, &[0; 4]).is_err());

        target.reconstruct(800, 600).unwrap();
        assert_eq!(target.state(), TargetState::Constructed);
        assert!(target.frame_uniform(2).is_some());
        target.write_frame_uniform(0, bytemuck::bytes_of(&2.5f32)).unwrap();
        assert_eq!(
            target.frame_uniform_data(0).map(|data| &data[..4]),
            Some(bytemuck::bytes_of(&2.5f32))
        );
    }

    #[test]
    fn test_frame_uniform_writes_need_constructed_target() {
        let device = Arc::new(HeadlessDevice::new());
        let layout = Arc::new(
            UniformBufferLayout::builder("Frame")
                .field("time", ShaderType::Float)
                .build()
                .unwrap(),
        );
        let desc = RenderTargetDesc::default().with_frame_uniforms(layout);
        let mut target = RenderTarget::new(device.clone(), desc, 320, 240).unwrap();
        target.register_pipeline(pipeline_desc("forward")).unwrap();

        device.fail_next(ResourceKind::Pipeline);
        assert!(target.reconstruct(640, 480).is_err());
        assert_eq!(target.state(), TargetState::Invalid);
        assert!(matches!(
            target.write_frame_uniform(0, &[0; 4]),
            Err(RenderError::TargetUnavailable(_))
        ));

        target.reconstruct(640, 480).unwrap();
        target.write_frame_uniform(0, &[0; 4]).unwrap();
    }

    #[test]
    fn test_drop_releases_everything() {
        let device = Arc::new(HeadlessDevice::new());
        {
            let layout = Arc::new(
                UniformBufferLayout::builder("Frame")
                    .field("time", ShaderType::Float)
                    .build()
                    .unwrap(),
            );
            let desc = RenderTargetDesc::default().with_frame_uniforms(layout);
            let mut target = RenderTarget::new(device.clone(), desc, 320, 240).unwrap();
            target.register_pipeline(pipeline_desc("forward")).unwrap();
        }
        assert_eq!(device.total_live(), 0);
        assert_eq!(device.invalid_operation_count(), 0);
    }
}
