//! Headless graphics device
//!
//! Implements [`GraphicsDevice`] entirely in memory. Buffers are byte vectors,
//! descriptor sets remember their writes, and every create / destroy is
//! counted per [`ResourceKind`] and appended to an event log so tests can
//! check leak freedom and teardown order.
//!
//! The device validates handles the way the Vulkan validation layers would:
//! creating a framebuffer against a destroyed render pass, or writing past
//! the end of a buffer, is an error instead of silent corruption.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::render::api::{
    BackendKind, BufferDesc, BufferHandle, DescriptorPoolHandle, DescriptorPoolSize,
    DescriptorResource, DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorWrite,
    DeviceLimits, Extent2D, Format, FramebufferDesc, FramebufferHandle, GraphicsDevice,
    GraphicsPipelineDesc, LayoutBinding, PipelineHandle, PipelineLayoutDesc,
    PipelineLayoutHandle, RenderPassDesc, RenderPassHandle, SwapchainDesc, SwapchainHandle,
    SwapchainInfo,
};
use crate::render::{RenderError, RenderResult};

/// Object categories tracked by the headless device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// Buffer
    Buffer,
    /// Descriptor set layout
    DescriptorSetLayout,
    /// Descriptor pool
    DescriptorPool,
    /// Descriptor set (freed with its pool)
    DescriptorSet,
    /// Swapchain
    Swapchain,
    /// Swapchain image view (freed with its swapchain)
    ImageView,
    /// Render pass
    RenderPass,
    /// Framebuffer
    Framebuffer,
    /// Pipeline layout
    PipelineLayout,
    /// Graphics pipeline
    Pipeline,
}

/// One entry of the device event log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// An object was created
    Created(ResourceKind, u64),
    /// An object was destroyed
    Destroyed(ResourceKind, u64),
    /// `wait_idle` was called
    WaitIdle,
}

#[derive(Debug, Default)]
struct PoolRecord {
    max_sets: u32,
    sets: Vec<u64>,
}

#[derive(Debug)]
struct SwapchainRecord {
    image_views: Vec<u64>,
}

#[derive(Debug)]
struct HeadlessState {
    next_handle: u64,
    live: HashMap<u64, ResourceKind>,
    buffers: HashMap<u64, Vec<u8>>,
    pools: HashMap<u64, PoolRecord>,
    set_writes: HashMap<u64, BTreeMap<u32, DescriptorResource>>,
    swapchains: HashMap<u64, SwapchainRecord>,
    created: BTreeMap<ResourceKind, usize>,
    destroyed: BTreeMap<ResourceKind, usize>,
    events: Vec<DeviceEvent>,
    // kind -> number of successful creations left before one failure
    failures: HashMap<ResourceKind, usize>,
    invalid_operations: usize,
    wait_idle_calls: usize,
    surface_format: Format,
    image_count: u32,
    max_extent: Option<Extent2D>,
    limits: DeviceLimits,
}

impl HeadlessState {
    fn new() -> Self {
        Self {
            next_handle: 1,
            live: HashMap::new(),
            buffers: HashMap::new(),
            pools: HashMap::new(),
            set_writes: HashMap::new(),
            swapchains: HashMap::new(),
            created: BTreeMap::new(),
            destroyed: BTreeMap::new(),
            events: Vec::new(),
            failures: HashMap::new(),
            invalid_operations: 0,
            wait_idle_calls: 0,
            surface_format: Format::Bgra8Srgb,
            image_count: 3,
            max_extent: None,
            limits: DeviceLimits {
                min_uniform_buffer_offset_alignment: 16,
                max_uniform_buffer_range: 65536,
            },
        }
    }

    fn check_failure(&mut self, kind: ResourceKind) -> RenderResult<()> {
        match self.failures.get_mut(&kind) {
            Some(0) => {
                self.failures.remove(&kind);
                log::debug!("Headless device: injected {:?} creation failure", kind);
                Err(RenderError::Backend(format!("injected {kind:?} creation failure")))
            }
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn create(&mut self, kind: ResourceKind) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.live.insert(handle, kind);
        *self.created.entry(kind).or_default() += 1;
        self.events.push(DeviceEvent::Created(kind, handle));
        handle
    }

    fn destroy(&mut self, kind: ResourceKind, handle: u64) -> bool {
        if self.live.get(&handle) == Some(&kind) {
            self.live.remove(&handle);
            *self.destroyed.entry(kind).or_default() += 1;
            self.events.push(DeviceEvent::Destroyed(kind, handle));
            true
        } else {
            log::warn!("Headless device: destroy of unknown {:?} {}", kind, handle);
            self.invalid_operations += 1;
            false
        }
    }

    fn require(&mut self, kind: ResourceKind, handle: u64) -> RenderResult<()> {
        if self.live.get(&handle) == Some(&kind) {
            Ok(())
        } else {
            self.invalid_operations += 1;
            Err(RenderError::Backend(format!("{kind:?} {handle} is not alive")))
        }
    }
}

/// In-memory [`GraphicsDevice`]
#[derive(Debug)]
pub struct HeadlessDevice {
    state: Mutex<HeadlessState>,
}

impl HeadlessDevice {
    /// Create a device with three swapchain images and 16-byte uniform alignment
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HeadlessState::new()),
        }
    }

    /// Override the reported device limits
    pub fn with_limits(self, limits: DeviceLimits) -> Self {
        self.state().limits = limits;
        self
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of images future swapchains will have
    pub fn set_image_count(&self, image_count: u32) {
        self.state().image_count = image_count.max(1);
    }

    /// Surface format future swapchains will report
    pub fn set_surface_format(&self, format: Format) {
        self.state().surface_format = format;
    }

    /// Clamp future swapchain extents, like a surface's `max_image_extent`
    pub fn set_max_extent(&self, extent: Option<Extent2D>) {
        self.state().max_extent = extent;
    }

    /// Make the next creation of `kind` fail
    pub fn fail_next(&self, kind: ResourceKind) {
        self.fail_after(kind, 0);
    }

    /// Let `successes` creations of `kind` succeed, then fail the next one
    pub fn fail_after(&self, kind: ResourceKind, successes: usize) {
        self.state().failures.insert(kind, successes);
    }

    /// Objects of `kind` currently alive
    pub fn live_count(&self, kind: ResourceKind) -> usize {
        self.state().live.values().filter(|&&k| k == kind).count()
    }

    /// Objects of every kind currently alive
    pub fn total_live(&self) -> usize {
        self.state().live.len()
    }

    /// Objects of `kind` created so far
    pub fn created_count(&self, kind: ResourceKind) -> usize {
        self.state().created.get(&kind).copied().unwrap_or(0)
    }

    /// Objects of `kind` destroyed so far
    pub fn destroyed_count(&self, kind: ResourceKind) -> usize {
        self.state().destroyed.get(&kind).copied().unwrap_or(0)
    }

    /// Destroys of unknown handles and uses of dead handles
    pub fn invalid_operation_count(&self) -> usize {
        self.state().invalid_operations
    }

    /// Number of `wait_idle` calls
    pub fn wait_idle_count(&self) -> usize {
        self.state().wait_idle_calls
    }

    /// Snapshot of the event log
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state().events.clone()
    }

    /// Clear the event log (counters are kept)
    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Whether `handle` is alive and of `kind`
    pub fn is_live(&self, kind: ResourceKind, handle: u64) -> bool {
        self.state().live.get(&handle) == Some(&kind)
    }

    /// Last resource written to `binding` of `set`
    pub fn descriptor_binding(
        &self,
        set: DescriptorSetHandle,
        binding: u32,
    ) -> Option<DescriptorResource> {
        self.state()
            .set_writes
            .get(&set.0)
            .and_then(|writes| writes.get(&binding).copied())
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn range_of(len: usize, offset: u64, size: usize) -> RenderResult<std::ops::Range<usize>> {
    let start = usize::try_from(offset)
        .map_err(|_| RenderError::Backend(format!("offset {offset} out of range")))?;
    let end = start
        .checked_add(size)
        .filter(|&end| end <= len)
        .ok_or_else(|| {
            RenderError::Backend(format!(
                "access of {size} bytes at {offset} overflows buffer of {len} bytes"
            ))
        })?;
    Ok(start..end)
}

impl GraphicsDevice for HeadlessDevice {
    fn backend(&self) -> BackendKind {
        BackendKind::Headless
    }

    fn limits(&self) -> DeviceLimits {
        self.state().limits
    }

    fn wait_idle(&self) -> RenderResult<()> {
        let mut state = self.state();
        state.wait_idle_calls += 1;
        state.events.push(DeviceEvent::WaitIdle);
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<BufferHandle> {
        let mut state = self.state();
        state.check_failure(ResourceKind::Buffer)?;
        let size = usize::try_from(desc.size)
            .map_err(|_| RenderError::Backend(format!("buffer size {} too large", desc.size)))?;
        let handle = state.create(ResourceKind::Buffer);
        state.buffers.insert(handle, vec![0; size]);
        Ok(BufferHandle(handle))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let mut state = self.state();
        state.require(ResourceKind::Buffer, buffer.0)?;
        let contents = state
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| RenderError::Backend(format!("buffer {} has no storage", buffer.0)))?;
        let range = range_of(contents.len(), offset, data.len())?;
        contents[range].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, len: usize) -> RenderResult<Vec<u8>> {
        let mut state = self.state();
        state.require(ResourceKind::Buffer, buffer.0)?;
        let contents = state
            .buffers
            .get(&buffer.0)
            .ok_or_else(|| RenderError::Backend(format!("buffer {} has no storage", buffer.0)))?;
        let range = range_of(contents.len(), offset, len)?;
        Ok(contents[range].to_vec())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state();
        if state.destroy(ResourceKind::Buffer, buffer.0) {
            state.buffers.remove(&buffer.0);
        }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
    ) -> RenderResult<DescriptorSetLayoutHandle> {
        let mut state = self.state();
        state.check_failure(ResourceKind::DescriptorSetLayout)?;
        let mut numbers: Vec<u32> = bindings.iter().map(|b| b.binding).collect();
        numbers.sort_unstable();
        if numbers.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(RenderError::Backend("duplicate binding number in layout".to_string()));
        }
        Ok(DescriptorSetLayoutHandle(state.create(ResourceKind::DescriptorSetLayout)))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        self.state().destroy(ResourceKind::DescriptorSetLayout, layout.0);
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _sizes: &[DescriptorPoolSize],
    ) -> RenderResult<DescriptorPoolHandle> {
        let mut state = self.state();
        state.check_failure(ResourceKind::DescriptorPool)?;
        let handle = state.create(ResourceKind::DescriptorPool);
        state.pools.insert(
            handle,
            PoolRecord {
                max_sets,
                sets: Vec::new(),
            },
        );
        Ok(DescriptorPoolHandle(handle))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        let mut state = self.state();
        if state.destroy(ResourceKind::DescriptorPool, pool.0) {
            let sets = state.pools.remove(&pool.0).map(|record| record.sets).unwrap_or_default();
            for set in sets {
                state.destroy(ResourceKind::DescriptorSet, set);
                state.set_writes.remove(&set);
            }
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        count: u32,
    ) -> RenderResult<Vec<DescriptorSetHandle>> {
        let mut state = self.state();
        state.require(ResourceKind::DescriptorPool, pool.0)?;
        state.require(ResourceKind::DescriptorSetLayout, layout.0)?;
        state.check_failure(ResourceKind::DescriptorSet)?;
        let (allocated, max_sets) = state
            .pools
            .get(&pool.0)
            .map(|record| (record.sets.len(), record.max_sets))
            .unwrap_or_default();
        if allocated + count as usize > max_sets as usize {
            return Err(RenderError::Backend(format!(
                "descriptor pool {} exhausted ({allocated} of {max_sets} sets used)",
                pool.0
            )));
        }
        let mut sets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let set = state.create(ResourceKind::DescriptorSet);
            sets.push(set);
        }
        if let Some(record) = state.pools.get_mut(&pool.0) {
            record.sets.extend(&sets);
        }
        Ok(sets.into_iter().map(DescriptorSetHandle).collect())
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let mut state = self.state();
        for write in writes {
            if state.require(ResourceKind::DescriptorSet, write.set.0).is_err() {
                log::warn!("Headless device: write to dead descriptor set {}", write.set.0);
                continue;
            }
            state
                .set_writes
                .entry(write.set.0)
                .or_default()
                .insert(write.binding, write.resource);
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<SwapchainInfo> {
        let mut state = self.state();
        state.check_failure(ResourceKind::Swapchain)?;
        if desc.extent.is_empty() {
            return Err(RenderError::Backend("swapchain extent is zero".to_string()));
        }
        let extent = match state.max_extent {
            Some(max) => Extent2D::new(desc.extent.width.min(max.width), desc.extent.height.min(max.height)),
            None => desc.extent,
        };
        let image_count = state.image_count;
        let handle = state.create(ResourceKind::Swapchain);
        let image_views = (0..image_count)
            .map(|_| state.create(ResourceKind::ImageView))
            .collect();
        state.swapchains.insert(handle, SwapchainRecord { image_views });
        Ok(SwapchainInfo {
            handle: SwapchainHandle(handle),
            format: state.surface_format,
            extent,
            image_count,
        })
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        let mut state = self.state();
        let views = state
            .swapchains
            .remove(&swapchain.0)
            .map(|record| record.image_views)
            .unwrap_or_default();
        for view in views {
            state.destroy(ResourceKind::ImageView, view);
        }
        state.destroy(ResourceKind::Swapchain, swapchain.0);
    }

    fn create_render_pass(
        &self,
        desc: &RenderPassDesc,
        swapchain_format: Format,
    ) -> RenderResult<RenderPassHandle> {
        let mut state = self.state();
        state.check_failure(ResourceKind::RenderPass)?;
        if desc.color_format(swapchain_format).is_depth() {
            return Err(RenderError::Backend("color attachment uses a depth format".to_string()));
        }
        if let Some(depth) = desc.depth {
            if !depth.format.is_depth() {
                return Err(RenderError::Backend("depth attachment uses a color format".to_string()));
            }
        }
        Ok(RenderPassHandle(state.create(ResourceKind::RenderPass)))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        self.state().destroy(ResourceKind::RenderPass, render_pass.0);
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> RenderResult<FramebufferHandle> {
        let mut state = self.state();
        state.require(ResourceKind::RenderPass, desc.render_pass.0)?;
        state.require(ResourceKind::Swapchain, desc.swapchain.0)?;
        let image_count = state
            .swapchains
            .get(&desc.swapchain.0)
            .map_or(0, |record| record.image_views.len());
        if desc.image_index as usize >= image_count {
            state.invalid_operations += 1;
            return Err(RenderError::Backend(format!(
                "swapchain image {} out of range ({image_count} images)",
                desc.image_index
            )));
        }
        state.check_failure(ResourceKind::Framebuffer)?;
        Ok(FramebufferHandle(state.create(ResourceKind::Framebuffer)))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        self.state().destroy(ResourceKind::Framebuffer, framebuffer.0);
    }

    fn create_pipeline_layout(
        &self,
        desc: &PipelineLayoutDesc,
    ) -> RenderResult<PipelineLayoutHandle> {
        let mut state = self.state();
        for layout in &desc.set_layouts {
            state.require(ResourceKind::DescriptorSetLayout, layout.0)?;
        }
        state.check_failure(ResourceKind::PipelineLayout)?;
        Ok(PipelineLayoutHandle(state.create(ResourceKind::PipelineLayout)))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        self.state().destroy(ResourceKind::PipelineLayout, layout.0);
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
        layout: PipelineLayoutHandle,
        render_pass: RenderPassHandle,
        extent: Extent2D,
    ) -> RenderResult<PipelineHandle> {
        let mut state = self.state();
        state.require(ResourceKind::PipelineLayout, layout.0)?;
        state.require(ResourceKind::RenderPass, render_pass.0)?;
        if desc.vertex_spirv.is_empty() || desc.fragment_spirv.is_empty() {
            return Err(RenderError::Backend(format!("pipeline '{}' has no shader code", desc.name)));
        }
        if extent.is_empty() {
            return Err(RenderError::Backend(format!("pipeline '{}' has an empty viewport", desc.name)));
        }
        state.check_failure(ResourceKind::Pipeline)?;
        Ok(PipelineHandle(state.create(ResourceKind::Pipeline)))
    }

    fn destroy_graphics_pipeline(&self, pipeline: PipelineHandle) {
        self.state().destroy(ResourceKind::Pipeline, pipeline.0);
    }
}
