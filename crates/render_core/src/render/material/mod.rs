//! Material system
//!
//! A material is a pipeline plus a descriptor-set layout built from a list of
//! uniform blocks and named textures. Materials form a clone graph: the root
//! owns the layout, the uniform pools and the CPU backing storage; clones share
//! all of it and keep their own dirty flag, descriptor sets and instance-id
//! cursor. Instance `N` of any material in a family addresses slot `N` of the
//! root's storage.
//!
//! ```text
//! root ──► SharedStorage { set layout, UniformBufferPool + BackingBuffer per block, DescriptorSetPool }
//!  ├── clone A        (dirty flag, descriptor sets, ids 0..)
//!  └── clone B
//!       └── clone C
//! ```
//!
//! Materials live in a generation-checked arena inside [`MaterialSystem`] and
//! are addressed by [`MaterialKey`].

pub mod backing;
pub mod instance;
pub mod layout;
#[allow(clippy::module_inception)]
pub mod material;
mod storage;
pub mod system;

use thiserror::Error;

pub use backing::{BackingBuffer, BACKING_BLOCK_SIZE};
pub use instance::{DrawBinding, MaterialInstance};
pub use layout::{ShaderType, UniformBufferElement, UniformBufferLayout, UniformBufferLayoutBuilder};
pub use material::{DirtyFlag, Material, MaterialCreateInfo, TextureSource};
pub use system::MaterialSystem;

slotmap::new_key_type! {
    /// Generation-checked key of a material in the arena
    pub struct MaterialKey;
}

/// Material lookup and layout errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaterialError {
    /// The key does not name a live material
    #[error("Unknown material {0:?}")]
    UnknownMaterial(MaterialKey),

    /// The instance was destroyed, or its id was reused since
    #[error("Stale material instance {instance_id} (generation {generation})")]
    StaleInstance {
        /// Instance id
        instance_id: u32,
        /// Generation carried by the handle
        generation: u32,
    },

    /// No uniform field has this name
    #[error("Material '{material}' has no variable '{name}'")]
    UnknownVariable {
        /// Material (or layout) name
        material: String,
        /// Requested variable
        name: String,
    },

    /// No texture binding has this name
    #[error("Material '{material}' has no texture '{name}'")]
    UnknownTexture {
        /// Material name
        material: String,
        /// Requested texture
        name: String,
    },

    /// The value size does not match the declared field size
    #[error("Variable '{name}' is {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Variable name
        name: String,
        /// Declared size
        expected: u32,
        /// Size supplied by the caller
        actual: usize,
    },

    /// A uniform layout or material description is unusable
    #[error("Invalid layout '{layout}': {reason}")]
    InvalidLayout {
        /// Layout or material name
        layout: String,
        /// What was wrong
        reason: String,
    },

    /// The family's shared storage is gone
    #[error("Material {0:?} has no shared storage")]
    MissingStorage(MaterialKey),
}
