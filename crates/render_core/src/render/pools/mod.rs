//! Pooled GPU resource allocators
//!
//! [`ChunkedObjectPool`] implements the allocation pattern once: fixed-size
//! chunks created lazily, a free set consulted before the cursor grows, and
//! deterministic `(chunk, offset)` addressing for every slot index. The
//! uniform buffer and descriptor set pools plug their GPU object type into it
//! through [`ChunkAllocator`].

pub mod chunked_pool;
pub mod descriptor_set_pool;
pub mod uniform_buffer_pool;

use thiserror::Error;

pub use chunked_pool::{ChunkAllocator, ChunkedObjectPool, PoolSlot, SlotLocation, MAX_CHUNK_BYTES};
pub use descriptor_set_pool::{DescriptorChunk, DescriptorSetObject, DescriptorSetPool};
pub use uniform_buffer_pool::{UniformBufferObject, UniformBufferPool};

/// Pool misuse and configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool cannot be built with the requested sizes
    #[error("Invalid pool configuration: {reason}")]
    Configuration {
        /// What was wrong
        reason: String,
    },

    /// The slot was released (and possibly re-acquired) since it was handed out
    #[error("Stale slot {index}: generation {generation}, current {current}")]
    StaleSlot {
        /// Slot index
        index: u32,
        /// Generation carried by the caller's slot
        generation: u32,
        /// Generation currently stored for the index
        current: u32,
    },

    /// The slot is already in the free set
    #[error("Slot {index} released twice")]
    DoubleRelease {
        /// Slot index
        index: u32,
    },

    /// The slot index was never handed out
    #[error("Slot {index} is beyond the pool cursor {cursor}")]
    OutOfRange {
        /// Slot index
        index: u32,
        /// Current cursor
        cursor: u32,
    },

    /// Every representable index is in use
    #[error("Pool index space exhausted")]
    Exhausted,

    /// A write did not fit the object it targets
    #[error("Write of {len} bytes at offset {offset} overflows object of {size} bytes")]
    WriteOverflow {
        /// Offset inside the object
        offset: u64,
        /// Length of the write
        len: usize,
        /// Object size
        size: u64,
    },
}
