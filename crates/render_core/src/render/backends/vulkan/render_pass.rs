use ash::{vk, Device};

use crate::render::api::{Format, RenderPassDesc};
use crate::render::backends::vulkan::buffer::find_memory_type;
use crate::render::backends::vulkan::convert;
use crate::render::backends::vulkan::VulkanResult;

/// Create a single-subpass render pass presenting to the swapchain
pub fn create_render_pass(
    device: &Device,
    desc: &RenderPassDesc,
    swapchain_format: Format,
) -> VulkanResult<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(convert::format_to_vk(desc.color_format(swapchain_format)))
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(convert::load_op(desc.color.load_op))
        .store_op(convert::store_op(desc.color.store_op))
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let mut attachments = vec![color_attachment];
    if let Some(depth) = desc.depth {
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(convert::format_to_vk(depth.format))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(convert::load_op(depth.load_op))
                .store_op(convert::store_op(depth.store_op))
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        );
    }

    let color_attachment_refs = [vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build()];
    let depth_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachment_refs);
    if desc.depth.is_some() {
        subpass = subpass.depth_stencil_attachment(&depth_attachment_ref);
    }
    let subpasses = [subpass.build()];

    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependencies = [vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build()];

    let render_pass_create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    Ok(unsafe { device.create_render_pass(&render_pass_create_info, None)? })
}

/// Depth image, memory and view owned by one framebuffer
#[derive(Debug, Clone, Copy)]
pub struct DepthImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl DepthImage {
    pub fn new(
        device: &Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        format: Format,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let vk_format = convert::format_to_vk(format);
        let image_create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(vk_format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { device.create_image(&image_create_info, None)? };

        let memory = match allocate_image_memory(device, memory_properties, image) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view = create_depth_view(device, image, memory, format);
        match view {
            Ok(view) => Ok(Self { image, memory, view }),
            Err(e) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                Err(e)
            }
        }
    }

    pub fn destroy(self, device: &Device) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
            device.free_memory(self.memory, None);
        }
    }
}

fn allocate_image_memory(
    device: &Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    image: vk::Image,
) -> VulkanResult<vk::DeviceMemory> {
    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let memory_type_index = find_memory_type(
        memory_properties,
        requirements.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);
    Ok(unsafe { device.allocate_memory(&alloc_info, None)? })
}

fn create_depth_view(
    device: &Device,
    image: vk::Image,
    memory: vk::DeviceMemory,
    format: Format,
) -> VulkanResult<vk::ImageView> {
    unsafe { device.bind_image_memory(image, memory, 0)? };

    let aspect_mask = if format == Format::Depth24Stencil8 {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    };
    let view_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(convert::format_to_vk(format))
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    Ok(unsafe { device.create_image_view(&view_info, None)? })
}

/// Framebuffer and the depth image it renders into
#[derive(Debug, Clone, Copy)]
pub struct FramebufferObjects {
    pub framebuffer: vk::Framebuffer,
    pub depth: Option<DepthImage>,
}

impl FramebufferObjects {
    pub fn new(
        device: &Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        render_pass: vk::RenderPass,
        color_view: vk::ImageView,
        depth_format: Option<Format>,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let depth = depth_format
            .map(|format| DepthImage::new(device, memory_properties, format, extent))
            .transpose()?;

        let mut attachments = vec![color_view];
        if let Some(depth) = &depth {
            attachments.push(depth.view);
        }

        let framebuffer_create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match unsafe { device.create_framebuffer(&framebuffer_create_info, None) } {
            Ok(framebuffer) => Ok(Self { framebuffer, depth }),
            Err(e) => {
                if let Some(depth) = depth {
                    depth.destroy(device);
                }
                Err(e.into())
            }
        }
    }

    pub fn destroy(self, device: &Device) {
        unsafe { device.destroy_framebuffer(self.framebuffer, None) };
        if let Some(depth) = self.depth {
            depth.destroy(device);
        }
    }
}
