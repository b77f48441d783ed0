//! [`GraphicsDevice`] over `ash`
//!
//! The instance, logical device and surface belong to the window layer and
//! outlive this device. Everything created through the trait is recorded in
//! an object table keyed by the raw Vulkan handle; whatever is still alive
//! when the device drops is destroyed leaf-first.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk::Handle;
use ash::{vk, Device, Instance};

use crate::render::api::{
    BackendKind, BufferDesc, BufferHandle, DescriptorPoolHandle, DescriptorPoolSize,
    DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorWrite, DeviceLimits, Extent2D,
    Format, FramebufferDesc, FramebufferHandle, GraphicsDevice, GraphicsPipelineDesc,
    LayoutBinding, PipelineHandle, PipelineLayoutDesc, PipelineLayoutHandle, RenderPassDesc,
    RenderPassHandle, SwapchainDesc, SwapchainHandle, SwapchainInfo,
};
use crate::render::backends::vulkan::buffer::AllocatedBuffer;
use crate::render::backends::vulkan::render_pass::FramebufferObjects;
use crate::render::backends::vulkan::swapchain::SwapchainImages;
use crate::render::backends::vulkan::{
    convert, descriptor_set, pipeline, render_pass, VulkanError,
};
use crate::render::RenderResult;

#[derive(Default)]
struct ObjectTable {
    buffers: HashMap<u64, AllocatedBuffer>,
    set_layouts: HashSet<u64>,
    descriptor_pools: HashSet<u64>,
    swapchains: HashMap<u64, SwapchainImages>,
    render_passes: HashSet<u64>,
    framebuffers: HashMap<u64, FramebufferObjects>,
    pipeline_layouts: HashSet<u64>,
    pipelines: HashSet<u64>,
}

impl ObjectTable {
    fn live_count(&self) -> usize {
        self.buffers.len()
            + self.set_layouts.len()
            + self.descriptor_pools.len()
            + self.swapchains.len()
            + self.render_passes.len()
            + self.framebuffers.len()
            + self.pipeline_layouts.len()
            + self.pipelines.len()
    }
}

/// Vulkan implementation of [`GraphicsDevice`]
pub struct VulkanDevice {
    device: Device,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    swapchain_loader: SwapchainLoader,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    limits: DeviceLimits,
    objects: Mutex<ObjectTable>,
}

impl VulkanDevice {
    /// Wrap a logical device and the surface it presents to
    pub fn new(
        instance: &Instance,
        device: Device,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: Surface,
    ) -> Self {
        let swapchain_loader = SwapchainLoader::new(instance, &device);
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let limits = DeviceLimits {
            min_uniform_buffer_offset_alignment: properties
                .limits
                .min_uniform_buffer_offset_alignment,
            max_uniform_buffer_range: u64::from(properties.limits.max_uniform_buffer_range),
        };

        log::info!(
            "Vulkan device ready: uniform offset alignment {}, max uniform range {}",
            limits.min_uniform_buffer_offset_alignment,
            limits.max_uniform_buffer_range
        );

        Self {
            device,
            physical_device,
            surface,
            surface_loader,
            swapchain_loader,
            memory_properties,
            limits,
            objects: Mutex::new(ObjectTable::default()),
        }
    }

    /// Raw `ash` device for command recording
    pub fn raw(&self) -> &Device {
        &self.device
    }

    /// Swapchain loader for acquire and present
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.swapchain_loader
    }

    /// Raw swapchain behind `handle`
    pub fn raw_swapchain(&self, handle: SwapchainHandle) -> Option<vk::SwapchainKHR> {
        self.objects()
            .swapchains
            .get(&handle.0)
            .map(|images| images.swapchain)
    }

    /// Number of objects created through this device and not yet destroyed
    pub fn live_object_count(&self) -> usize {
        self.objects().live_count()
    }

    fn objects(&self) -> MutexGuard<'_, ObjectTable> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl GraphicsDevice for VulkanDevice {
    fn backend(&self) -> BackendKind {
        BackendKind::Vulkan
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(VulkanError::Api)?;
        Ok(())
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RenderResult<BufferHandle> {
        let buffer = AllocatedBuffer::new(&self.device, &self.memory_properties, desc)?;
        let raw = buffer.buffer.as_raw();
        self.objects().buffers.insert(raw, buffer);
        Ok(BufferHandle(raw))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let allocated = self
            .objects()
            .buffers
            .get(&buffer.0)
            .copied()
            .ok_or(VulkanError::ResourceNotFound { id: buffer.0 })?;
        allocated.write(&self.device, offset, data)?;
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, len: usize) -> RenderResult<Vec<u8>> {
        let allocated = self
            .objects()
            .buffers
            .get(&buffer.0)
            .copied()
            .ok_or(VulkanError::ResourceNotFound { id: buffer.0 })?;
        Ok(allocated.read(&self.device, offset, len)?)
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        match self.objects().buffers.remove(&buffer.0) {
            Some(allocated) => allocated.destroy(&self.device),
            None => log::warn!("destroy_buffer: unknown buffer {:#x}", buffer.0),
        }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
    ) -> RenderResult<DescriptorSetLayoutHandle> {
        let layout = descriptor_set::create_layout(&self.device, bindings)?;
        self.objects().set_layouts.insert(layout.as_raw());
        Ok(DescriptorSetLayoutHandle(layout.as_raw()))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        if self.objects().set_layouts.remove(&layout.0) {
            unsafe {
                self.device.destroy_descriptor_set_layout(
                    vk::DescriptorSetLayout::from_raw(layout.0),
                    None,
                );
            }
        } else {
            log::warn!("destroy_descriptor_set_layout: unknown layout {:#x}", layout.0);
        }
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[DescriptorPoolSize],
    ) -> RenderResult<DescriptorPoolHandle> {
        let pool = descriptor_set::create_pool(&self.device, max_sets, sizes)?;
        self.objects().descriptor_pools.insert(pool.as_raw());
        Ok(DescriptorPoolHandle(pool.as_raw()))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        if self.objects().descriptor_pools.remove(&pool.0) {
            unsafe {
                self.device
                    .destroy_descriptor_pool(vk::DescriptorPool::from_raw(pool.0), None);
            }
        } else {
            log::warn!("destroy_descriptor_pool: unknown pool {:#x}", pool.0);
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        count: u32,
    ) -> RenderResult<Vec<DescriptorSetHandle>> {
        {
            let objects = self.objects();
            if !objects.descriptor_pools.contains(&pool.0) {
                return Err(VulkanError::ResourceNotFound { id: pool.0 }.into());
            }
            if !objects.set_layouts.contains(&layout.0) {
                return Err(VulkanError::ResourceNotFound { id: layout.0 }.into());
            }
        }
        let sets = descriptor_set::allocate_sets(
            &self.device,
            vk::DescriptorPool::from_raw(pool.0),
            vk::DescriptorSetLayout::from_raw(layout.0),
            count,
        )?;
        Ok(sets
            .into_iter()
            .map(|set| DescriptorSetHandle(set.as_raw()))
            .collect())
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        descriptor_set::update_sets(&self.device, writes);
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<SwapchainInfo> {
        let images = SwapchainImages::new(
            &self.device,
            &self.swapchain_loader,
            &self.surface_loader,
            self.physical_device,
            self.surface,
            desc,
        )?;
        let info = SwapchainInfo {
            handle: SwapchainHandle(images.swapchain.as_raw()),
            format: convert::format_from_vk(images.format.format),
            extent: convert::extent_from_vk(images.extent),
            image_count: images.image_views.len() as u32,
        };
        self.objects().swapchains.insert(info.handle.0, images);
        Ok(info)
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        match self.objects().swapchains.remove(&swapchain.0) {
            Some(images) => images.destroy(&self.device, &self.swapchain_loader),
            None => log::warn!("destroy_swapchain: unknown swapchain {:#x}", swapchain.0),
        }
    }

    fn create_render_pass(
        &self,
        desc: &RenderPassDesc,
        swapchain_format: Format,
    ) -> RenderResult<RenderPassHandle> {
        let render_pass = render_pass::create_render_pass(&self.device, desc, swapchain_format)?;
        self.objects().render_passes.insert(render_pass.as_raw());
        Ok(RenderPassHandle(render_pass.as_raw()))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        if self.objects().render_passes.remove(&render_pass.0) {
            unsafe {
                self.device
                    .destroy_render_pass(vk::RenderPass::from_raw(render_pass.0), None);
            }
        } else {
            log::warn!("destroy_render_pass: unknown render pass {:#x}", render_pass.0);
        }
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> RenderResult<FramebufferHandle> {
        let color_view = {
            let objects = self.objects();
            if !objects.render_passes.contains(&desc.render_pass.0) {
                return Err(VulkanError::ResourceNotFound { id: desc.render_pass.0 }.into());
            }
            let images = objects
                .swapchains
                .get(&desc.swapchain.0)
                .ok_or(VulkanError::ResourceNotFound { id: desc.swapchain.0 })?;
            *images
                .image_views
                .get(desc.image_index as usize)
                .ok_or_else(|| VulkanError::InvalidOperation {
                    reason: format!("swapchain has no image {}", desc.image_index),
                })?
        };

        let framebuffer = FramebufferObjects::new(
            &self.device,
            &self.memory_properties,
            vk::RenderPass::from_raw(desc.render_pass.0),
            color_view,
            desc.depth_format,
            convert::extent_to_vk(desc.extent),
        )?;
        let raw = framebuffer.framebuffer.as_raw();
        self.objects().framebuffers.insert(raw, framebuffer);
        Ok(FramebufferHandle(raw))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        match self.objects().framebuffers.remove(&framebuffer.0) {
            Some(objects) => objects.destroy(&self.device),
            None => log::warn!("destroy_framebuffer: unknown framebuffer {:#x}", framebuffer.0),
        }
    }

    fn create_pipeline_layout(
        &self,
        desc: &PipelineLayoutDesc,
    ) -> RenderResult<PipelineLayoutHandle> {
        let layout = pipeline::create_pipeline_layout(&self.device, desc)?;
        self.objects().pipeline_layouts.insert(layout.as_raw());
        Ok(PipelineLayoutHandle(layout.as_raw()))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        if self.objects().pipeline_layouts.remove(&layout.0) {
            unsafe {
                self.device
                    .destroy_pipeline_layout(vk::PipelineLayout::from_raw(layout.0), None);
            }
        } else {
            log::warn!("destroy_pipeline_layout: unknown layout {:#x}", layout.0);
        }
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
        layout: PipelineLayoutHandle,
        render_pass: RenderPassHandle,
        extent: Extent2D,
    ) -> RenderResult<PipelineHandle> {
        let pipeline = pipeline::create_graphics_pipeline(
            &self.device,
            desc,
            vk::PipelineLayout::from_raw(layout.0),
            vk::RenderPass::from_raw(render_pass.0),
            convert::extent_to_vk(extent),
        )?;
        log::debug!("[PIPELINE] Created '{}' as {:?}", desc.name, pipeline);
        self.objects().pipelines.insert(pipeline.as_raw());
        Ok(PipelineHandle(pipeline.as_raw()))
    }

    fn destroy_graphics_pipeline(&self, pipeline: PipelineHandle) {
        if self.objects().pipelines.remove(&pipeline.0) {
            unsafe {
                self.device
                    .destroy_pipeline(vk::Pipeline::from_raw(pipeline.0), None);
            }
        } else {
            log::warn!("destroy_graphics_pipeline: unknown pipeline {:#x}", pipeline.0);
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let objects = std::mem::take(
            self.objects
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if objects.live_count() == 0 {
            return;
        }

        log::warn!(
            "VulkanDevice dropped with {} live objects; destroying them",
            objects.live_count()
        );
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            log::error!("device_wait_idle failed during drop: {:?}", e);
        }

        unsafe {
            for (_, framebuffer) in objects.framebuffers {
                framebuffer.destroy(&self.device);
            }
            for pipeline in objects.pipelines {
                self.device
                    .destroy_pipeline(vk::Pipeline::from_raw(pipeline), None);
            }
            for layout in objects.pipeline_layouts {
                self.device
                    .destroy_pipeline_layout(vk::PipelineLayout::from_raw(layout), None);
            }
            for render_pass in objects.render_passes {
                self.device
                    .destroy_render_pass(vk::RenderPass::from_raw(render_pass), None);
            }
            for (_, images) in objects.swapchains {
                images.destroy(&self.device, &self.swapchain_loader);
            }
            for pool in objects.descriptor_pools {
                self.device
                    .destroy_descriptor_pool(vk::DescriptorPool::from_raw(pool), None);
            }
            for layout in objects.set_layouts {
                self.device
                    .destroy_descriptor_set_layout(vk::DescriptorSetLayout::from_raw(layout), None);
            }
            for (_, buffer) in objects.buffers {
                buffer.destroy(&self.device);
            }
        }
    }
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("physical_device", &self.physical_device)
            .field("limits", &self.limits)
            .field("live_objects", &self.live_object_count())
            .finish()
    }
}
