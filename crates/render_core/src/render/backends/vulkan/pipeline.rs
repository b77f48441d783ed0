use std::ffi::CStr;

use ash::{vk, Device};

use crate::render::api::{GraphicsPipelineDesc, PipelineLayoutDesc};
use crate::render::backends::vulkan::convert;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

pub fn create_pipeline_layout(
    device: &Device,
    desc: &PipelineLayoutDesc,
) -> VulkanResult<vk::PipelineLayout> {
    use ash::vk::Handle;

    let set_layouts: Vec<vk::DescriptorSetLayout> = desc
        .set_layouts
        .iter()
        .map(|layout| vk::DescriptorSetLayout::from_raw(layout.0))
        .collect();
    let push_constant_ranges: Vec<vk::PushConstantRange> = if desc.push_constant_size > 0 {
        vec![vk::PushConstantRange {
            stage_flags: convert::shader_stages(desc.push_constant_stages),
            offset: 0,
            size: desc.push_constant_size,
        }]
    } else {
        Vec::new()
    };

    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_constant_ranges);
    Ok(unsafe { device.create_pipeline_layout(&layout_info, None)? })
}

/// Shader module destroyed when dropped
struct ShaderModule<'a> {
    device: &'a Device,
    module: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    fn new(device: &'a Device, words: &[u32]) -> VulkanResult<Self> {
        if words.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "empty SPIR-V module".to_string(),
            });
        }
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);
        let module = unsafe {
            device.create_shader_module(&create_info, None).map_err(|e| {
                log::error!("[SHADER] vkCreateShaderModule failed: {:?}", e);
                VulkanError::Api(e)
            })?
        };
        Ok(Self { device, module })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}

/// Create a graphics pipeline with a fixed viewport covering `extent`
pub fn create_graphics_pipeline(
    device: &Device,
    desc: &GraphicsPipelineDesc,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> VulkanResult<vk::Pipeline> {
    let entry_point = CStr::from_bytes_with_nul(b"main\0")
        .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;

    let vertex_shader = ShaderModule::new(device, &desc.vertex_spirv)?;
    let fragment_shader = ShaderModule::new(device, &desc.fragment_spirv)?;
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_shader.module)
            .name(entry_point)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_shader.module)
            .name(entry_point)
            .build(),
    ];

    let binding_descriptions: Vec<vk::VertexInputBindingDescription> = desc
        .vertex_bindings
        .iter()
        .map(|binding| vk::VertexInputBindingDescription {
            binding: binding.binding,
            stride: binding.stride,
            input_rate: if binding.per_instance {
                vk::VertexInputRate::INSTANCE
            } else {
                vk::VertexInputRate::VERTEX
            },
        })
        .collect();
    let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = desc
        .vertex_attributes
        .iter()
        .map(|attribute| vk::VertexInputAttributeDescription {
            location: attribute.location,
            binding: attribute.binding,
            format: convert::vertex_format(attribute.format),
            offset: attribute.offset,
        })
        .collect();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // The viewport is baked in, so a resize rebuilds the pipeline.
    let viewports = [vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }];
    let scissors = [vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(&viewports)
        .scissors(&scissors);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(convert::cull_mode(desc.cull_mode))
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(desc.depth_test)
        .depth_write_enable(desc.depth_test)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(desc.blend)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .build()];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    let pipelines = unsafe {
        device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
            .map_err(|(_, err)| VulkanError::Api(err))?
    };

    pipelines.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
        reason: format!("no pipeline returned for '{}'", desc.name),
    })
}
