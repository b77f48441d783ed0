use ash::vk::Handle;
use ash::{vk, Device};

use crate::render::api::{DescriptorPoolSize, DescriptorResource, DescriptorWrite, LayoutBinding};
use crate::render::backends::vulkan::convert;
use crate::render::backends::vulkan::VulkanResult;

pub fn create_layout(device: &Device, bindings: &[LayoutBinding]) -> VulkanResult<vk::DescriptorSetLayout> {
    let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
        .iter()
        .map(|binding| {
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding.binding)
                .descriptor_type(convert::descriptor_type(binding.kind))
                .descriptor_count(binding.count)
                .stage_flags(convert::shader_stages(binding.stages))
                .build()
        })
        .collect();

    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);
    Ok(unsafe { device.create_descriptor_set_layout(&layout_info, None)? })
}

pub fn create_pool(
    device: &Device,
    max_sets: u32,
    sizes: &[DescriptorPoolSize],
) -> VulkanResult<vk::DescriptorPool> {
    let pool_sizes: Vec<vk::DescriptorPoolSize> = sizes
        .iter()
        .map(|size| {
            vk::DescriptorPoolSize::builder()
                .ty(convert::descriptor_type(size.kind))
                .descriptor_count(size.count)
                .build()
        })
        .collect();

    // Sets are never freed individually; the whole pool goes at once.
    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(&pool_sizes)
        .max_sets(max_sets);
    Ok(unsafe { device.create_descriptor_pool(&pool_info, None)? })
}

pub fn allocate_sets(
    device: &Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    count: u32,
) -> VulkanResult<Vec<vk::DescriptorSet>> {
    let layouts = vec![layout; count as usize];
    let alloc_info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(pool)
        .set_layouts(&layouts);
    Ok(unsafe { device.allocate_descriptor_sets(&alloc_info)? })
}

pub fn update_sets(device: &Device, writes: &[DescriptorWrite]) {
    if writes.is_empty() {
        return;
    }

    // Info structs must outlive the write array that points into them.
    let mut buffer_infos = Vec::with_capacity(writes.len());
    let mut image_infos = Vec::with_capacity(writes.len());
    for write in writes {
        match write.resource {
            DescriptorResource::Buffer { buffer, offset, range } => {
                buffer_infos.push(
                    vk::DescriptorBufferInfo::builder()
                        .buffer(vk::Buffer::from_raw(buffer.0))
                        .offset(offset)
                        .range(range)
                        .build(),
                );
                image_infos.push(vk::DescriptorImageInfo::default());
            }
            DescriptorResource::Image { view, sampler } => {
                buffer_infos.push(vk::DescriptorBufferInfo::default());
                image_infos.push(
                    vk::DescriptorImageInfo::builder()
                        .image_view(vk::ImageView::from_raw(view.0))
                        .sampler(vk::Sampler::from_raw(sampler.0))
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                        .build(),
                );
            }
        }
    }

    let vk_writes: Vec<vk::WriteDescriptorSet> = writes
        .iter()
        .enumerate()
        .map(|(i, write)| {
            let builder = vk::WriteDescriptorSet::builder()
                .dst_set(vk::DescriptorSet::from_raw(write.set.0))
                .dst_binding(write.binding)
                .dst_array_element(0)
                .descriptor_type(convert::descriptor_type(write.kind));
            match write.resource {
                DescriptorResource::Buffer { .. } => builder
                    .buffer_info(std::slice::from_ref(&buffer_infos[i]))
                    .build(),
                DescriptorResource::Image { .. } => builder
                    .image_info(std::slice::from_ref(&image_infos[i]))
                    .build(),
            }
        })
        .collect();

    unsafe { device.update_descriptor_sets(&vk_writes, &[]) };
}
