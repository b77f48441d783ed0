//! Descriptor set pool
//!
//! Each chunk is one descriptor pool sized for `chunk_size` sets of a single
//! layout. All of a chunk's sets are allocated when the chunk is created, so
//! acquiring a slot never calls into the driver.

use std::collections::BTreeMap;

use crate::render::api::{
    DescriptorKind, DescriptorPoolHandle, DescriptorPoolSize, DescriptorSetHandle,
    DescriptorSetLayoutHandle, DescriptorWrite, DeviceRef, LayoutBinding,
};
use crate::render::pools::{ChunkAllocator, ChunkedObjectPool, PoolError, PoolSlot, SlotLocation};
use crate::render::{RenderError, RenderResult};

/// One descriptor set handed out by the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSetObject {
    /// Pool slot backing this set
    pub slot: PoolSlot,
    /// The descriptor set
    pub set: DescriptorSetHandle,
}

/// A descriptor pool and the sets pre-allocated from it
#[derive(Debug)]
pub struct DescriptorChunk {
    /// Device descriptor pool
    pub pool: DescriptorPoolHandle,
    /// `chunk_size` sets, in slot order
    pub sets: Vec<DescriptorSetHandle>,
}

/// Allocates one descriptor pool per chunk
pub struct DescriptorChunkAllocator {
    device: DeviceRef,
    layout: DescriptorSetLayoutHandle,
    bindings: Vec<LayoutBinding>,
}

impl DescriptorChunkAllocator {
    fn pool_sizes(&self, chunk_size: u32) -> Vec<DescriptorPoolSize> {
        let mut per_kind: BTreeMap<DescriptorKind, u32> = BTreeMap::new();
        for binding in &self.bindings {
            *per_kind.entry(binding.kind).or_default() += binding.count * chunk_size;
        }
        per_kind
            .into_iter()
            .map(|(kind, count)| DescriptorPoolSize { kind, count })
            .collect()
    }
}

impl ChunkAllocator for DescriptorChunkAllocator {
    type Chunk = DescriptorChunk;
    type Object = DescriptorSetObject;

    fn create_chunk(
        &mut self,
        chunk_index: usize,
        chunk_size: u32,
        _stride: u64,
    ) -> RenderResult<DescriptorChunk> {
        let pool = self
            .device
            .create_descriptor_pool(chunk_size, &self.pool_sizes(chunk_size))?;

        let sets = match self
            .device
            .allocate_descriptor_sets(pool, self.layout, chunk_size)
        {
            Ok(sets) if sets.len() == chunk_size as usize => sets,
            Ok(sets) => {
                self.device.destroy_descriptor_pool(pool);
                return Err(RenderError::Backend(format!(
                    "descriptor pool returned {} sets, expected {chunk_size}",
                    sets.len()
                )));
            }
            Err(e) => {
                self.device.destroy_descriptor_pool(pool);
                return Err(e);
            }
        };

        log::debug!(
            "Created descriptor chunk {} ({} sets)",
            chunk_index,
            chunk_size
        );
        Ok(DescriptorChunk { pool, sets })
    }

    fn make_object(
        &self,
        chunk: &DescriptorChunk,
        slot: PoolSlot,
        location: SlotLocation,
    ) -> DescriptorSetObject {
        DescriptorSetObject {
            slot,
            // `create_chunk` rejects a chunk without exactly `chunk_size` sets
            set: chunk.sets[location.element_index as usize],
        }
    }

    fn destroy_chunk(&mut self, chunk: DescriptorChunk) {
        self.device.destroy_descriptor_pool(chunk.pool);
    }
}

/// Chunked pool of descriptor sets of one layout
///
/// The pool does not own the layout; the caller keeps it alive for as long
/// as the pool exists.
pub struct DescriptorSetPool {
    pool: ChunkedObjectPool<DescriptorChunkAllocator>,
}

impl DescriptorSetPool {
    /// Create a pool of sets of `layout`, whose bindings are `bindings`
    pub fn new(
        device: DeviceRef,
        layout: DescriptorSetLayoutHandle,
        bindings: &[LayoutBinding],
        chunk_size: u32,
    ) -> RenderResult<Self> {
        if bindings.is_empty() {
            return Err(PoolError::Configuration {
                reason: "descriptor set layout has no bindings".to_string(),
            }
            .into());
        }
        let allocator = DescriptorChunkAllocator {
            device,
            layout,
            bindings: bindings.to_vec(),
        };
        Ok(Self {
            pool: ChunkedObjectPool::new(allocator, chunk_size, 1)?,
        })
    }

    /// See [`ChunkedObjectPool::acquire`]
    pub fn acquire(&mut self) -> RenderResult<DescriptorSetObject> {
        self.pool.acquire()
    }

    /// See [`ChunkedObjectPool::acquire_at`]
    pub fn acquire_at(&mut self, index: u32) -> RenderResult<DescriptorSetObject> {
        self.pool.acquire_at(index)
    }

    /// Return a set to the pool; its contents are left as they are
    pub fn release(&mut self, object: DescriptorSetObject) -> Result<(), PoolError> {
        self.pool.release(object.slot)
    }

    /// Apply writes to live sets of this pool
    pub fn update(&self, writes: &[DescriptorWrite]) {
        if !writes.is_empty() {
            self.pool.allocator().device.update_descriptor_sets(writes);
        }
    }

    /// Layout every set is allocated with
    pub fn layout(&self) -> DescriptorSetLayoutHandle {
        self.pool.allocator().layout
    }

    /// Bindings of the layout
    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.pool.allocator().bindings
    }

    /// Whether `object` is still live
    pub fn is_live(&self, object: DescriptorSetObject) -> bool {
        self.pool.is_live(object.slot)
    }

    /// Chunks (descriptor pools) created so far
    pub fn chunk_count(&self) -> usize {
        self.pool.chunk_count()
    }

    /// Live sets
    pub fn live_count(&self) -> usize {
        self.pool.live_count()
    }

    /// One past the highest slot handed out
    pub fn cursor(&self) -> u32 {
        self.pool.cursor()
    }
}

impl std::fmt::Debug for DescriptorSetPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetPool")
            .field("layout", &self.layout())
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::render::api::{DescriptorResource, GraphicsDevice, ShaderStages};
    use crate::render::backends::headless::{HeadlessDevice, ResourceKind};

    fn bindings() -> Vec<LayoutBinding> {
        vec![
            LayoutBinding::dynamic_uniform(0, ShaderStages::ALL_GRAPHICS),
            LayoutBinding::combined_image_sampler(1, ShaderStages::FRAGMENT),
        ]
    }

    fn setup() -> (Arc<HeadlessDevice>, DescriptorSetLayoutHandle) {
        let device = Arc::new(HeadlessDevice::new());
        let layout = device.create_descriptor_set_layout(&bindings()).unwrap();
        (device, layout)
    }

    #[test]
    fn test_chunk_preallocates_every_set() {
        let (device, layout) = setup();
        let mut pool = DescriptorSetPool::new(device.clone(), layout, &bindings(), 4).unwrap();

        let first = pool.acquire().unwrap();
        assert_eq!(device.live_count(ResourceKind::DescriptorPool), 1);
        assert_eq!(device.live_count(ResourceKind::DescriptorSet), 4);

        for _ in 0..3 {
            pool.acquire().unwrap();
        }
        assert_eq!(device.created_count(ResourceKind::DescriptorSet), 4);

        pool.acquire().unwrap();
        assert_eq!(pool.chunk_count(), 2);

        pool.release(first).unwrap();
        assert_eq!(pool.acquire().unwrap().set, first.set);
    }

    #[test]
    fn test_slots_map_to_their_chunk_sets() {
        let (device, layout) = setup();
        let mut pool = DescriptorSetPool::new(device, layout, &bindings(), 3).unwrap();

        let objects: Vec<_> = (0..6).map(|_| pool.acquire().unwrap()).collect();
        for object in &objects {
            let location = pool.pool.location(object.slot.index);
            let chunk = pool.pool.chunk(location.chunk_index).unwrap();
            assert_eq!(object.set, chunk.sets[location.element_index as usize]);
            assert_ne!(object.set, DescriptorSetHandle::NULL);
        }
        let mut sets: Vec<_> = objects.iter().map(|object| object.set).collect();
        sets.sort();
        sets.dedup();
        assert_eq!(sets.len(), 6);
    }

    #[test]
    fn test_pool_sizes_scale_with_chunk() {
        let (device, layout) = setup();
        let pool = DescriptorSetPool::new(device, layout, &bindings(), 8).unwrap();
        let sizes = pool.pool.allocator().pool_sizes(8);

        assert_eq!(sizes.len(), 2);
        assert!(sizes.iter().all(|size| size.count == 8));
    }

    #[test]
    fn test_update_reaches_device() {
        let (device, layout) = setup();
        let mut pool = DescriptorSetPool::new(device.clone(), layout, &bindings(), 2).unwrap();
        let object = pool.acquire().unwrap();
        let resource = DescriptorResource::Buffer {
            buffer: crate::render::api::BufferHandle(7),
            offset: 0,
            range: 64,
        };

        pool.update(&[DescriptorWrite {
            set: object.set,
            binding: 0,
            kind: DescriptorKind::UniformBufferDynamic,
            resource,
        }]);
        assert_eq!(device.descriptor_binding(object.set, 0), Some(resource));
    }

    #[test]
    fn test_failed_allocation_destroys_pool() {
        let (device, layout) = setup();
        let mut pool = DescriptorSetPool::new(device.clone(), layout, &bindings(), 2).unwrap();
        device.fail_next(ResourceKind::DescriptorSet);

        assert!(pool.acquire().is_err());
        assert_eq!(device.live_count(ResourceKind::DescriptorPool), 0);
        assert_eq!(pool.chunk_count(), 0);
    }

    #[test]
    fn test_drop_destroys_pools_and_sets() {
        let (device, layout) = setup();
        {
            let mut pool = DescriptorSetPool::new(device.clone(), layout, &bindings(), 2).unwrap();
            pool.acquire_at(5).unwrap();
        }
        assert_eq!(device.live_count(ResourceKind::DescriptorPool), 0);
        assert_eq!(device.live_count(ResourceKind::DescriptorSet), 0);
        device.destroy_descriptor_set_layout(layout);
        assert_eq!(device.total_live(), 0);
    }
}
