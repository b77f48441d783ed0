//! Generic chunked object pool

use std::collections::BTreeSet;

use crate::render::pools::PoolError;
use crate::render::RenderResult;

/// Largest byte size a single chunk may span
///
/// Matches the smallest `maxUniformBufferRange` guaranteed by Vulkan, so a
/// whole uniform chunk is always bindable through one descriptor.
pub const MAX_CHUNK_BYTES: u64 = 65536;

/// Handle to one pool slot
///
/// The generation changes every time the slot is released, so a handle kept
/// past its release is detected instead of aliasing the next owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolSlot {
    /// Slot index, dense from zero
    pub index: u32,
    /// Generation of the index when this handle was issued
    pub generation: u32,
}

/// Where a slot lives inside the pool's chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotLocation {
    /// `index / chunk_size`
    pub chunk_index: usize,
    /// `index % chunk_size`
    pub element_index: u32,
    /// `element_index * stride`
    pub byte_offset: u64,
}

/// Creates and destroys the GPU object behind one chunk
pub trait ChunkAllocator {
    /// GPU storage for `chunk_size` objects
    type Chunk;
    /// Object handed to callers, wrapping a view into a chunk
    type Object;

    /// Allocate chunk number `chunk_index`
    fn create_chunk(
        &mut self,
        chunk_index: usize,
        chunk_size: u32,
        stride: u64,
    ) -> RenderResult<Self::Chunk>;

    /// Wrap a slot of an existing chunk
    fn make_object(&self, chunk: &Self::Chunk, slot: PoolSlot, location: SlotLocation)
        -> Self::Object;

    /// Free a chunk's GPU storage
    fn destroy_chunk(&mut self, chunk: Self::Chunk);
}

/// Fixed-size chunked allocator with free-slot reuse
///
/// Every index below `cursor` is either live or in the free set. Chunks are
/// only ever appended; releasing a slot never returns GPU memory.
pub struct ChunkedObjectPool<A: ChunkAllocator> {
    allocator: A,
    chunks: Vec<A::Chunk>,
    free_slots: BTreeSet<u32>,
    generations: Vec<u32>,
    cursor: u32,
    chunk_size: u32,
    stride: u64,
}

impl<A: ChunkAllocator> ChunkedObjectPool<A> {
    /// Create an empty pool; no chunk is allocated until the first acquire
    pub fn new(allocator: A, chunk_size: u32, stride: u64) -> Result<Self, PoolError> {
        if chunk_size == 0 {
            return Err(PoolError::Configuration {
                reason: "chunk size must be at least one object".to_string(),
            });
        }
        if stride == 0 {
            return Err(PoolError::Configuration {
                reason: "object stride must be non-zero".to_string(),
            });
        }
        let chunk_bytes = u64::from(chunk_size).saturating_mul(stride);
        if chunk_bytes > MAX_CHUNK_BYTES {
            return Err(PoolError::Configuration {
                reason: format!(
                    "chunk of {chunk_size} x {stride} bytes ({chunk_bytes}) exceeds the {MAX_CHUNK_BYTES}-byte cap"
                ),
            });
        }

        Ok(Self {
            allocator,
            chunks: Vec::new(),
            free_slots: BTreeSet::new(),
            generations: Vec::new(),
            cursor: 0,
            chunk_size,
            stride,
        })
    }

    /// Hand out a free slot if there is one, otherwise the slot at the cursor
    pub fn acquire(&mut self) -> RenderResult<A::Object> {
        if let Some(index) = self.free_slots.pop_first() {
            return Ok(self.object_at(index));
        }
        self.acquire_at(self.cursor)
    }

    /// Hand out the slot at `index`
    ///
    /// Below the cursor this re-acquires a free slot, or returns the same
    /// object again if it is already live. At or past the cursor every missing
    /// chunk up to `index` is created and the indices skipped over become free.
    pub fn acquire_at(&mut self, index: u32) -> RenderResult<A::Object> {
        if index < self.cursor {
            self.free_slots.remove(&index);
            return Ok(self.object_at(index));
        }
        if index == u32::MAX {
            return Err(PoolError::Exhausted.into());
        }

        let needed_chunks = (index / self.chunk_size) as usize + 1;
        let existing_chunks = self.chunks.len();
        while self.chunks.len() < needed_chunks {
            match self
                .allocator
                .create_chunk(self.chunks.len(), self.chunk_size, self.stride)
            {
                Ok(chunk) => self.chunks.push(chunk),
                Err(e) => {
                    log::error!("Failed to create pool chunk {}: {}", self.chunks.len(), e);
                    while self.chunks.len() > existing_chunks {
                        if let Some(chunk) = self.chunks.pop() {
                            self.allocator.destroy_chunk(chunk);
                        }
                    }
                    return Err(e);
                }
            }
        }

        self.free_slots.extend(self.cursor..index);
        self.generations.resize(index as usize + 1, 0);
        self.cursor = index + 1;
        Ok(self.object_at(index))
    }

    /// Return a slot to the free set
    pub fn release(&mut self, slot: PoolSlot) -> Result<(), PoolError> {
        self.check_live(slot)?;
        let generation = &mut self.generations[slot.index as usize];
        *generation = generation.wrapping_add(1);
        self.free_slots.insert(slot.index);
        Ok(())
    }

    /// Re-wrap a live slot
    pub fn resolve(&self, slot: PoolSlot) -> Result<A::Object, PoolError> {
        self.check_live(slot)?;
        Ok(self.object_at(slot.index))
    }

    /// Whether `slot` is live with a matching generation
    pub fn is_live(&self, slot: PoolSlot) -> bool {
        self.check_live(slot).is_ok()
    }

    /// Chunk and byte offset of `index`
    pub fn location(&self, index: u32) -> SlotLocation {
        let element_index = index % self.chunk_size;
        SlotLocation {
            chunk_index: (index / self.chunk_size) as usize,
            element_index,
            byte_offset: u64::from(element_index) * self.stride,
        }
    }

    /// Chunk storage by index
    pub fn chunk(&self, chunk_index: usize) -> Option<&A::Chunk> {
        self.chunks.get(chunk_index)
    }

    /// The chunk allocator
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Number of chunks created so far
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// One past the highest index ever handed out
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Indices below the cursor waiting for reuse
    pub fn free_count(&self) -> usize {
        self.free_slots.len()
    }

    /// Indices currently held by callers
    pub fn live_count(&self) -> usize {
        self.cursor as usize - self.free_slots.len()
    }

    /// Bytes between consecutive objects in a chunk
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Objects per chunk
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    fn check_live(&self, slot: PoolSlot) -> Result<(), PoolError> {
        if slot.index >= self.cursor {
            return Err(PoolError::OutOfRange {
                index: slot.index,
                cursor: self.cursor,
            });
        }
        if self.free_slots.contains(&slot.index) {
            return Err(PoolError::DoubleRelease { index: slot.index });
        }
        let current = self.generations[slot.index as usize];
        if current != slot.generation {
            return Err(PoolError::StaleSlot {
                index: slot.index,
                generation: slot.generation,
                current,
            });
        }
        Ok(())
    }

    // Only called for indices below the cursor, whose chunk always exists.
    fn object_at(&self, index: u32) -> A::Object {
        let location = self.location(index);
        let slot = PoolSlot {
            index,
            generation: self.generations[index as usize],
        };
        self.allocator
            .make_object(&self.chunks[location.chunk_index], slot, location)
    }
}

impl<A: ChunkAllocator> Drop for ChunkedObjectPool<A> {
    fn drop(&mut self) {
        for chunk in self.chunks.drain(..) {
            self.allocator.destroy_chunk(chunk);
        }
    }
}

impl<A: ChunkAllocator> std::fmt::Debug for ChunkedObjectPool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedObjectPool")
            .field("chunks", &self.chunks.len())
            .field("cursor", &self.cursor)
            .field("free_slots", &self.free_slots.len())
            .field("chunk_size", &self.chunk_size)
            .field("stride", &self.stride)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderError;

    #[derive(Default)]
    struct CountingAllocator {
        created: usize,
        destroyed: usize,
        fail_at: Option<usize>,
    }

    impl ChunkAllocator for CountingAllocator {
        type Chunk = usize;
        type Object = (PoolSlot, SlotLocation);

        fn create_chunk(&mut self, chunk_index: usize, _: u32, _: u64) -> RenderResult<usize> {
            if self.fail_at == Some(chunk_index) {
                return Err(RenderError::Backend("out of device memory".to_string()));
            }
            self.created += 1;
            Ok(chunk_index)
        }

        fn make_object(&self, chunk: &usize, slot: PoolSlot, location: SlotLocation) -> Self::Object {
            assert_eq!(*chunk, location.chunk_index);
            (slot, location)
        }

        fn destroy_chunk(&mut self, _: usize) {
            self.destroyed += 1;
        }
    }

    fn pool(chunk_size: u32, stride: u64) -> ChunkedObjectPool<CountingAllocator> {
        ChunkedObjectPool::new(CountingAllocator::default(), chunk_size, stride).unwrap()
    }

    #[test]
    fn test_acquire_at_is_deterministic() {
        let mut pool = pool(4, 64);
        let (_, first) = pool.acquire_at(6).unwrap();
        let (_, second) = pool.acquire_at(6).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.chunk_index, 1);
        assert_eq!(first.byte_offset, 2 * 64);
    }

    #[test]
    fn test_free_slots_are_used_before_cursor_grows() {
        let mut pool = pool(4, 16);
        let slots: Vec<_> = (0..3).map(|_| pool.acquire().unwrap().0).collect();
        pool.release(slots[0]).unwrap();
        pool.release(slots[2]).unwrap();

        let cursor = pool.cursor();
        let (a, _) = pool.acquire().unwrap();
        let (b, _) = pool.acquire().unwrap();
        assert_eq!(pool.cursor(), cursor);

        let mut reused = [a.index, b.index];
        reused.sort_unstable();
        assert_eq!(reused, [0, 2]);

        pool.acquire().unwrap();
        assert_eq!(pool.cursor(), cursor + 1);
    }

    #[test]
    fn test_chunk_boundary() {
        let chunk_size = 8;
        let mut pool = pool(chunk_size, 16);

        pool.acquire_at(chunk_size - 1).unwrap();
        assert_eq!(pool.chunk_count(), 1);
        pool.acquire_at(chunk_size).unwrap();
        assert_eq!(pool.chunk_count(), 2);
        pool.acquire_at(2 * chunk_size - 1).unwrap();
        assert_eq!(pool.chunk_count(), 2);
        assert_eq!(pool.allocator().created, 2);
    }

    #[test]
    fn test_end_to_end_scenario() {
        let mut pool = pool(2, 16);
        let _zero = pool.acquire_at(0).unwrap();
        let (one, _) = pool.acquire_at(1).unwrap();
        let _two = pool.acquire_at(2).unwrap();
        assert_eq!(pool.allocator().created, 2);

        pool.release(one).unwrap();
        let (reused, location) = pool.acquire().unwrap();
        assert_eq!(reused.index, 1);
        assert_eq!(location.byte_offset, 16);
        assert_eq!(pool.allocator().created, 2);

        let (next, location) = pool.acquire().unwrap();
        assert_eq!(next.index, 3);
        assert_eq!(location.chunk_index, 1);
        assert_eq!(pool.allocator().created, 2);
    }

    #[test]
    fn test_skipped_indices_become_free() {
        let mut pool = pool(4, 16);
        pool.acquire_at(5).unwrap();

        assert_eq!(pool.cursor(), 6);
        assert_eq!(pool.free_count(), 5);
        assert_eq!(pool.live_count(), 1);
        assert_eq!(pool.acquire().unwrap().0.index, 0);
    }

    #[test]
    fn test_stale_and_double_release() {
        let mut pool = pool(2, 16);
        let (slot, _) = pool.acquire().unwrap();
        pool.release(slot).unwrap();

        assert_eq!(pool.release(slot), Err(PoolError::DoubleRelease { index: 0 }));

        let (again, _) = pool.acquire().unwrap();
        assert_eq!(again.index, 0);
        assert_ne!(again.generation, slot.generation);
        assert!(matches!(pool.release(slot), Err(PoolError::StaleSlot { index: 0, .. })));
        assert!(matches!(pool.resolve(slot), Err(PoolError::StaleSlot { .. })));
        assert!(pool.is_live(again));
        assert!(matches!(
            pool.release(PoolSlot { index: 9, generation: 0 }),
            Err(PoolError::OutOfRange { index: 9, cursor: 1 })
        ));
    }

    #[test]
    fn test_oversized_chunk_is_rejected() {
        let result = ChunkedObjectPool::new(CountingAllocator::default(), 256, 512);
        assert!(matches!(result, Err(PoolError::Configuration { .. })));
        assert!(ChunkedObjectPool::new(CountingAllocator::default(), 0, 16).is_err());
        assert!(ChunkedObjectPool::new(CountingAllocator::default(), 256, 256).is_ok());
    }

    #[test]
    fn test_failed_chunk_creation_leaves_pool_unchanged() {
        let allocator = CountingAllocator {
            fail_at: Some(2),
            ..Default::default()
        };
        let mut pool = ChunkedObjectPool::new(allocator, 2, 16).unwrap();
        pool.acquire().unwrap();

        assert!(pool.acquire_at(5).is_err());
        assert_eq!(pool.chunk_count(), 1);
        assert_eq!(pool.cursor(), 1);
        assert_eq!(pool.allocator().destroyed, 1);
    }

    #[test]
    fn test_release_keeps_chunks() {
        let mut pool = pool(2, 16);
        let slots: Vec<_> = (0..4).map(|_| pool.acquire().unwrap().0).collect();
        for slot in slots {
            pool.release(slot).unwrap();
        }
        assert_eq!(pool.chunk_count(), 2);
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.allocator().destroyed, 0);
    }
}
