use ash::{vk, Device};

use crate::render::api::BufferDesc;
use crate::render::backends::vulkan::convert;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Buffer and the memory bound to it
#[derive(Debug, Clone, Copy)]
pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub host_visible: bool,
}

impl AllocatedBuffer {
    /// Create a buffer with dedicated memory
    pub fn new(
        device: &Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        desc: &BufferDesc,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(convert::buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None)? };

        let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let properties = if desc.host_visible {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };

        let memory_type_index =
            match find_memory_type(memory_properties, mem_requirements.memory_type_bits, properties) {
                Ok(index) => index,
                Err(e) => {
                    unsafe { device.destroy_buffer(buffer, None) };
                    return Err(e);
                }
            };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(e.into());
        }

        Ok(Self {
            buffer,
            memory,
            size: desc.size,
            host_visible: desc.host_visible,
        })
    }

    /// Copy `data` into the buffer at `offset`
    pub fn write(&self, device: &Device, offset: u64, data: &[u8]) -> VulkanResult<()> {
        self.check_range(offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        unsafe {
            let ptr = device.map_memory(
                self.memory,
                offset,
                data.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Read `len` bytes back from `offset`
    pub fn read(&self, device: &Device, offset: u64, len: usize) -> VulkanResult<Vec<u8>> {
        self.check_range(offset, len)?;
        let mut out = vec![0u8; len];
        if len == 0 {
            return Ok(out);
        }
        unsafe {
            let ptr = device.map_memory(
                self.memory,
                offset,
                len as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), out.as_mut_ptr(), len);
            device.unmap_memory(self.memory);
        }
        Ok(out)
    }

    pub fn destroy(self, device: &Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }

    fn check_range(&self, offset: u64, len: usize) -> VulkanResult<()> {
        if !self.host_visible {
            return Err(VulkanError::InvalidOperation {
                reason: "buffer is not host visible".to_string(),
            });
        }
        if offset + len as u64 > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "range {}..{} exceeds buffer size {}",
                    offset,
                    offset + len as u64,
                    self.size
                ),
            });
        }
        Ok(())
    }
}

/// First memory type allowed by `type_filter` with all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            (type_filter & (1 << i)) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            props.memory_types[i].property_flags = flags;
        }
        props
    }

    #[test]
    fn test_find_memory_type_respects_filter_and_flags() {
        let props = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type(&props, 0b111, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
        assert!(matches!(
            find_memory_type(&props, 0b011, host),
            Err(VulkanError::NoSuitableMemoryType)
        ));
    }
}
