//! CPU-side backing storage for material instance data
//!
//! Instance data is packed into fixed-size blocks. Instance `id` lives at
//!
//! ```text
//! blocks[id / element_count] + (id % element_count) * element_size
//! ```
//!
//! where `element_count = block_size / element_size`. Blocks are appended
//! as ids grow and are never freed until the owning root material goes away.

use crate::render::material::MaterialError;

/// Default backing block size in bytes
pub const BACKING_BLOCK_SIZE: usize = 65536;

/// Packed per-instance copies of one uniform layout
#[derive(Debug, Clone)]
pub struct BackingBuffer {
    element_size: usize,
    element_count: u32,
    block_size: usize,
    blocks: Vec<Box<[u8]>>,
}

impl BackingBuffer {
    /// Storage for elements of `element_size` bytes in blocks of `block_size`
    ///
    /// No block is allocated until [`Self::ensure_capacity`] is first called.
    pub fn new(layout_name: &str, element_size: u32, block_size: usize) -> Result<Self, MaterialError> {
        let element_size = element_size as usize;
        if element_size == 0 || element_size > block_size {
            return Err(MaterialError::InvalidLayout {
                layout: layout_name.to_string(),
                reason: format!("element of {element_size} bytes does not fit a {block_size}-byte block"),
            });
        }
        let element_count = u32::try_from(block_size / element_size).unwrap_or(u32::MAX);
        Ok(Self {
            element_size,
            element_count,
            block_size,
            blocks: Vec::new(),
        })
    }

    /// Append zeroed blocks until `id` is addressable
    pub fn ensure_capacity(&mut self, id: u32) {
        let needed = (id / self.element_count) as usize + 1;
        while self.blocks.len() < needed {
            self.blocks.push(vec![0u8; self.block_size].into_boxed_slice());
        }
    }

    /// Bytes of element `id`, if its block exists
    pub fn element(&self, id: u32) -> Option<&[u8]> {
        let (block, start) = self.address(id);
        self.blocks
            .get(block)
            .map(|block| &block[start..start + self.element_size])
    }

    /// Mutable bytes of element `id`, if its block exists
    pub fn element_mut(&mut self, id: u32) -> Option<&mut [u8]> {
        let (block, start) = self.address(id);
        let size = self.element_size;
        self.blocks
            .get_mut(block)
            .map(|block| &mut block[start..start + size])
    }

    /// Zero element `id`
    pub fn clear(&mut self, id: u32) {
        if let Some(bytes) = self.element_mut(id) {
            bytes.fill(0);
        }
    }

    /// Block index and byte offset of element `id`
    pub fn address(&self, id: u32) -> (usize, usize) {
        let block = (id / self.element_count) as usize;
        let start = (id % self.element_count) as usize * self.element_size;
        (block, start)
    }

    /// Elements per block
    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    /// Bytes per element
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Blocks allocated so far
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of ids addressable without growing
    pub fn capacity(&self) -> usize {
        self.blocks.len() * self.element_count as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_first_block() {
        let mut backing = BackingBuffer::new("Surface", 48, BACKING_BLOCK_SIZE).unwrap();
        assert_eq!(backing.block_count(), 0);
        assert!(backing.element(0).is_none());

        backing.ensure_capacity(0);
        assert_eq!(backing.block_count(), 1);
        assert_eq!(backing.element_count(), 1365);
        assert_eq!(backing.element(0).map(<[u8]>::len), Some(48));
    }

    #[test]
    fn test_growth_across_block_boundary() {
        let mut backing = BackingBuffer::new("Surface", 64, BACKING_BLOCK_SIZE).unwrap();
        let per_block = backing.element_count();
        assert_eq!(per_block, 1024);

        backing.ensure_capacity(per_block - 1);
        assert_eq!(backing.block_count(), 1);
        backing.ensure_capacity(per_block);
        assert_eq!(backing.block_count(), 2);
        assert_eq!(backing.address(per_block), (1, 0));
        assert_eq!(backing.address(per_block + 3), (1, 3 * 64));
    }

    #[test]
    fn test_elements_do_not_overlap() {
        let mut backing = BackingBuffer::new("Tint", 16, 64).unwrap();
        backing.ensure_capacity(7);
        for id in 0..8u8 {
            backing.element_mut(u32::from(id)).unwrap().fill(id);
        }
        for id in 0..8u8 {
            assert!(backing.element(u32::from(id)).unwrap().iter().all(|&b| b == id));
        }

        backing.clear(5);
        assert!(backing.element(5).unwrap().iter().all(|&b| b == 0));
        assert_eq!(backing.capacity(), 8);
    }

    #[test]
    fn test_oversized_element_is_rejected() {
        assert!(BackingBuffer::new("Huge", 128, 64).is_err());
        assert!(BackingBuffer::new("Zero", 0, 64).is_err());
    }
}
