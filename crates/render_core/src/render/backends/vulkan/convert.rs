use ash::vk;

use crate::render::api::{
    BufferUsage, CullMode, DescriptorKind, Extent2D, Format, LoadOp, ShaderStages, StoreOp,
    VertexFormat,
};

pub fn format_to_vk(format: Format) -> vk::Format {
    match format {
        Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::Depth32Float => vk::Format::D32_SFLOAT,
        Format::Depth24Stencil8 => vk::Format::D24_UNORM_S8_UINT,
        Format::Other(raw) => vk::Format::from_raw(raw),
    }
}

pub fn format_from_vk(format: vk::Format) -> Format {
    match format {
        vk::Format::B8G8R8A8_SRGB => Format::Bgra8Srgb,
        vk::Format::B8G8R8A8_UNORM => Format::Bgra8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::Rgba8Srgb,
        vk::Format::R8G8B8A8_UNORM => Format::Rgba8Unorm,
        vk::Format::R16G16B16A16_SFLOAT => Format::Rgba16Float,
        vk::Format::D32_SFLOAT => Format::Depth32Float,
        vk::Format::D24_UNORM_S8_UINT => Format::Depth24Stencil8,
        other => Format::Other(other.as_raw()),
    }
}

pub fn descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

pub fn shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

pub fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

pub fn load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub fn store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub fn cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub fn vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float => vk::Format::R32_SFLOAT,
        VertexFormat::Vec2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Vec3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Vec4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::UInt => vk::Format::R32_UINT,
    }
}

pub fn extent_to_vk(extent: Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width,
        height: extent.height,
    }
}

pub fn extent_from_vk(extent: vk::Extent2D) -> Extent2D {
    Extent2D::new(extent.width, extent.height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_formats_map_both_ways() {
        for format in [
            Format::Bgra8Srgb,
            Format::Bgra8Unorm,
            Format::Rgba8Srgb,
            Format::Rgba8Unorm,
            Format::Rgba16Float,
            Format::Depth32Float,
            Format::Depth24Stencil8,
        ] {
            assert_eq!(format_from_vk(format_to_vk(format)), format);
        }
        assert_eq!(
            format_from_vk(vk::Format::A2B10G10R10_UNORM_PACK32),
            Format::Other(vk::Format::A2B10G10R10_UNORM_PACK32.as_raw())
        );
    }

    #[test]
    fn test_shader_stages() {
        assert_eq!(
            shader_stages(ShaderStages::ALL_GRAPHICS),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(shader_stages(ShaderStages::empty()), vk::ShaderStageFlags::empty());
    }

    #[test]
    fn test_dynamic_uniform_descriptor_type() {
        assert_eq!(
            descriptor_type(DescriptorKind::UniformBufferDynamic),
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        );
    }
}
