//! Uniform buffer pool
//!
//! Each chunk is one host-visible uniform buffer holding `chunk_size`
//! elements of a [`UniformBufferLayout`], spaced by the layout size rounded up
//! to the device's dynamic-offset alignment. A descriptor bound to the chunk
//! buffer reaches any element through its dynamic offset.

use std::sync::Arc;

use bytemuck::Pod;

use crate::render::api::{BufferDesc, BufferHandle, DeviceRef};
use crate::render::material::UniformBufferLayout;
use crate::render::pools::{ChunkAllocator, ChunkedObjectPool, PoolError, PoolSlot, SlotLocation};
use crate::render::{MaterialError, RenderResult};

/// One element of a uniform buffer chunk
#[derive(Debug, Clone)]
pub struct UniformBufferObject {
    /// Pool slot backing this object
    pub slot: PoolSlot,
    /// Chunk buffer
    pub buffer: BufferHandle,
    /// Byte offset of the element inside `buffer` (the dynamic offset)
    pub offset: u64,
    /// Element size in bytes
    pub size: u64,
    /// Layout of the element
    pub layout: Arc<UniformBufferLayout>,
}

/// Allocates one uniform buffer per chunk
pub struct UniformChunkAllocator {
    device: DeviceRef,
    layout: Arc<UniformBufferLayout>,
}

impl ChunkAllocator for UniformChunkAllocator {
    type Chunk = BufferHandle;
    type Object = UniformBufferObject;

    fn create_chunk(
        &mut self,
        chunk_index: usize,
        chunk_size: u32,
        stride: u64,
    ) -> RenderResult<BufferHandle> {
        let size = u64::from(chunk_size) * stride;
        let buffer = self.device.create_buffer(&BufferDesc::uniform(size))?;
        log::debug!(
            "Created uniform chunk {} for '{}' ({} bytes)",
            chunk_index,
            self.layout.name(),
            size
        );
        Ok(buffer)
    }

    fn make_object(
        &self,
        chunk: &BufferHandle,
        slot: PoolSlot,
        location: SlotLocation,
    ) -> UniformBufferObject {
        UniformBufferObject {
            slot,
            buffer: *chunk,
            offset: location.byte_offset,
            size: u64::from(self.layout.size()),
            layout: Arc::clone(&self.layout),
        }
    }

    fn destroy_chunk(&mut self, chunk: BufferHandle) {
        self.device.destroy_buffer(chunk);
    }
}

/// Chunked pool of uniform buffer elements sharing one layout
pub struct UniformBufferPool {
    pool: ChunkedObjectPool<UniformChunkAllocator>,
}

impl UniformBufferPool {
    /// Create a pool for `layout`
    ///
    /// The stride is the layout size aligned to the larger of `min_alignment`
    /// and the device's minimum uniform offset alignment. A chunk larger than
    /// [`MAX_CHUNK_BYTES`](crate::render::pools::MAX_CHUNK_BYTES) is rejected.
    pub fn new(
        device: DeviceRef,
        layout: Arc<UniformBufferLayout>,
        chunk_size: u32,
        min_alignment: u64,
    ) -> RenderResult<Self> {
        let stride = Self::aligned_stride(&device, &layout, min_alignment)?;
        let allocator = UniformChunkAllocator { device, layout };
        Ok(Self {
            pool: ChunkedObjectPool::new(allocator, chunk_size, stride)?,
        })
    }

    /// Distance between two elements of `layout` in a chunk
    pub fn aligned_stride(
        device: &DeviceRef,
        layout: &UniformBufferLayout,
        min_alignment: u64,
    ) -> Result<u64, PoolError> {
        let alignment = min_alignment
            .max(device.limits().min_uniform_buffer_offset_alignment)
            .max(1);
        if !alignment.is_power_of_two() {
            return Err(PoolError::Configuration {
                reason: format!("uniform alignment {alignment} is not a power of two"),
            });
        }
        Ok(align_up(u64::from(layout.size()), alignment))
    }

    /// See [`ChunkedObjectPool::acquire`]
    pub fn acquire(&mut self) -> RenderResult<UniformBufferObject> {
        self.pool.acquire()
    }

    /// See [`ChunkedObjectPool::acquire_at`]
    pub fn acquire_at(&mut self, index: u32) -> RenderResult<UniformBufferObject> {
        self.pool.acquire_at(index)
    }

    /// Return an object's slot to the pool
    pub fn release(&mut self, object: &UniformBufferObject) -> Result<(), PoolError> {
        self.pool.release(object.slot)
    }

    /// Re-wrap a live slot
    pub fn resolve(&self, slot: PoolSlot) -> Result<UniformBufferObject, PoolError> {
        self.pool.resolve(slot)
    }

    /// Overwrite the start of an element with `bytes`
    pub fn write(&self, object: &UniformBufferObject, bytes: &[u8]) -> RenderResult<()> {
        self.write_at(object, 0, bytes)
    }

    /// Overwrite one named field of an element
    pub fn write_element(
        &self,
        object: &UniformBufferObject,
        name: &str,
        bytes: &[u8],
    ) -> RenderResult<()> {
        let element = self.layout().element(name).ok_or_else(|| MaterialError::UnknownVariable {
            material: self.layout().name().to_string(),
            name: name.to_string(),
        })?;
        if bytes.len() != element.size as usize {
            return Err(MaterialError::SizeMismatch {
                name: name.to_string(),
                expected: element.size,
                actual: bytes.len(),
            }
            .into());
        }
        self.write_at(object, u64::from(element.offset), bytes)
    }

    /// Typed form of [`Self::write_element`]
    pub fn write_value<T: Pod>(
        &self,
        object: &UniformBufferObject,
        name: &str,
        value: &T,
    ) -> RenderResult<()> {
        self.write_element(object, name, bytemuck::bytes_of(value))
    }

    /// Read an element back from the device
    pub fn read(&self, object: &UniformBufferObject) -> RenderResult<Vec<u8>> {
        self.pool.resolve(object.slot)?;
        self.pool
            .allocator()
            .device
            .read_buffer(object.buffer, object.offset, object.size as usize)
    }

    fn write_at(&self, object: &UniformBufferObject, offset: u64, bytes: &[u8]) -> RenderResult<()> {
        self.pool.resolve(object.slot)?;
        if offset + bytes.len() as u64 > object.size {
            return Err(PoolError::WriteOverflow {
                offset,
                len: bytes.len(),
                size: object.size,
            }
            .into());
        }
        self.pool
            .allocator()
            .device
            .write_buffer(object.buffer, object.offset + offset, bytes)
    }

    /// Buffer of chunk `chunk_index`, if it exists
    pub fn chunk_buffer(&self, chunk_index: usize) -> Option<BufferHandle> {
        self.pool.chunk(chunk_index).copied()
    }

    /// Element layout
    pub fn layout(&self) -> &Arc<UniformBufferLayout> {
        &self.pool.allocator().layout
    }

    /// Bytes between consecutive elements
    pub fn stride(&self) -> u64 {
        self.pool.stride()
    }

    /// Elements per chunk
    pub fn chunk_size(&self) -> u32 {
        self.pool.chunk_size()
    }

    /// Chunk index holding `index`
    pub fn chunk_of(&self, index: u32) -> usize {
        self.pool.location(index).chunk_index
    }

    /// Chunks created so far
    pub fn chunk_count(&self) -> usize {
        self.pool.chunk_count()
    }

    /// One past the highest index handed out
    pub fn cursor(&self) -> u32 {
        self.pool.cursor()
    }

    /// Free indices below the cursor
    pub fn free_count(&self) -> usize {
        self.pool.free_count()
    }

    /// Live elements
    pub fn live_count(&self) -> usize {
        self.pool.live_count()
    }
}

impl std::fmt::Debug for UniformBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformBufferPool")
            .field("layout", &self.layout().name())
            .field("pool", &self.pool)
            .finish()
    }
}

/// Round `value` up to a power-of-two `alignment`
pub(crate) const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::create_headless_device;
    use crate::render::backends::headless::{HeadlessDevice, ResourceKind};
    use crate::render::material::ShaderType;

    fn layout() -> Arc<UniformBufferLayout> {
        Arc::new(
            UniformBufferLayout::builder("Surface")
                .field("color", ShaderType::Vec4)
                .field("roughness", ShaderType::Float)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(20, 16), 32);
        assert_eq!(align_up(256, 256), 256);
    }

    #[test]
    fn test_stride_follows_device_alignment() {
        let device = create_headless_device();
        let pool = UniformBufferPool::new(device, layout(), 8, 64).unwrap();
        assert_eq!(pool.layout().size(), 32);
        assert_eq!(pool.stride(), 64);
    }

    #[test]
    fn test_named_write_lands_at_field_offset() {
        let device = create_headless_device();
        let mut pool = UniformBufferPool::new(device, layout(), 4, 16).unwrap();
        let _first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert_eq!(second.offset, 32);

        pool.write_value(&second, "roughness", &0.5f32).unwrap();
        let bytes = pool.read(&second).unwrap();
        let roughness: f32 = bytemuck::pod_read_unaligned(&bytes[16..20]);
        approx::assert_relative_eq!(roughness, 0.5);

        assert!(pool.write_value(&second, "roughness", &[0.0f32; 2]).is_err());
        assert!(pool.write_value(&second, "missing", &0.0f32).is_err());
    }

    #[test]
    fn test_released_object_cannot_be_written() {
        let device = create_headless_device();
        let mut pool = UniformBufferPool::new(device, layout(), 4, 16).unwrap();
        let object = pool.acquire().unwrap();
        pool.release(&object).unwrap();
        assert!(pool.write(&object, &[0; 4]).is_err());
    }

    #[test]
    fn test_drop_destroys_chunk_buffers() {
        let headless = Arc::new(HeadlessDevice::new());
        let device: DeviceRef = headless.clone();
        {
            let mut pool = UniformBufferPool::new(device, layout(), 2, 16).unwrap();
            pool.acquire_at(3).unwrap();
            assert_eq!(pool.chunk_count(), 2);
        }
        assert_eq!(headless.created_count(ResourceKind::Buffer), 2);
        assert_eq!(headless.live_count(ResourceKind::Buffer), 0);
    }
}
