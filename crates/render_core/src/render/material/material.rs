//! Material graph nodes

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::render::api::{ImageViewHandle, SamplerHandle, ShaderStages};
use crate::render::material::{MaterialError, MaterialKey, UniformBufferLayout};
use crate::render::pools::DescriptorSetObject;
use crate::render::target::PipelineId;

/// How much derived GPU state of a material is out of date
///
/// Flags only ever merge upwards until the material is prepared for drawing:
/// `Clean < InstanceDirty < StructureDirty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DirtyFlag {
    /// Nothing to do
    #[default]
    Clean,
    /// Some instance data has not been uploaded
    InstanceDirty,
    /// Descriptor sets must be rewritten
    StructureDirty,
}

impl DirtyFlag {
    /// The stronger of two flags
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Image view and sampler bound to a texture slot
///
/// Both handles belong to the asset layer, which keeps them alive while any
/// material references them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSource {
    /// Image view
    pub image_view: ImageViewHandle,
    /// Sampler
    pub sampler: SamplerHandle,
}

/// Everything needed to create a root material
#[derive(Debug, Clone)]
pub struct MaterialCreateInfo {
    /// Debug name
    pub name: String,
    /// Pipeline registered with the render target
    pub pipeline: PipelineId,
    /// Uniform blocks, bound at bindings `0..n` as dynamic uniform buffers
    pub uniform_layouts: Vec<Arc<UniformBufferLayout>>,
    /// Named textures, bound after the uniform blocks
    pub textures: Vec<(String, TextureSource)>,
    /// Stages that read the material's descriptors
    pub stages: ShaderStages,
}

impl MaterialCreateInfo {
    /// Material with no uniforms or textures yet
    pub fn new(name: impl Into<String>, pipeline: PipelineId) -> Self {
        Self {
            name: name.into(),
            pipeline,
            uniform_layouts: Vec::new(),
            textures: Vec::new(),
            stages: ShaderStages::ALL_GRAPHICS,
        }
    }

    /// Add a uniform block
    pub fn with_uniform(mut self, layout: Arc<UniformBufferLayout>) -> Self {
        self.uniform_layouts.push(layout);
        self
    }

    /// Add a named texture
    pub fn with_texture(mut self, name: impl Into<String>, source: TextureSource) -> Self {
        self.textures.push((name.into(), source));
        self
    }

    /// Restrict the stages that read the material's descriptors
    pub fn with_stages(mut self, stages: ShaderStages) -> Self {
        self.stages = stages;
        self
    }
}

/// Descriptor set of one uniform chunk
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkDescriptorSet {
    pub object: DescriptorSetObject,
    pub written: bool,
}

/// Instance ids handed out by one material
#[derive(Debug, Clone, Default)]
pub(crate) struct InstanceIds {
    cursor: u32,
    free: BTreeSet<u32>,
    generations: Vec<u32>,
}

impl InstanceIds {
    /// Reuse a free id, or take the cursor
    pub fn allocate(&mut self) -> (u32, u32) {
        let id = match self.free.pop_first() {
            Some(id) => id,
            None => {
                let id = self.cursor;
                self.cursor += 1;
                self.generations.push(0);
                id
            }
        };
        (id, self.generations[id as usize])
    }

    /// Undo an [`Self::allocate`] whose instance never escaped
    pub fn unallocate(&mut self, id: u32) {
        self.free.insert(id);
    }

    pub fn release(&mut self, id: u32, generation: u32) -> Result<(), MaterialError> {
        if !self.is_live(id, generation) {
            return Err(MaterialError::StaleInstance {
                instance_id: id,
                generation,
            });
        }
        let current = &mut self.generations[id as usize];
        *current = current.wrapping_add(1);
        self.free.insert(id);
        Ok(())
    }

    pub fn is_live(&self, id: u32, generation: u32) -> bool {
        id < self.cursor
            && !self.free.contains(&id)
            && self.generations[id as usize] == generation
    }

    pub fn live_ids(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.cursor).filter(|id| !self.free.contains(id))
    }

    pub fn live_count(&self) -> usize {
        self.cursor as usize - self.free.len()
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }
}

/// One node of the material clone graph
#[derive(Debug)]
pub struct Material {
    pub(crate) name: String,
    pub(crate) pipeline: PipelineId,
    pub(crate) parent: Option<MaterialKey>,
    pub(crate) children: Vec<MaterialKey>,
    pub(crate) textures: Vec<(String, TextureSource)>,
    pub(crate) ids: InstanceIds,
    pub(crate) dirty: DirtyFlag,
    pub(crate) released: bool,
    pub(crate) descriptor_sets: Vec<Option<ChunkDescriptorSet>>,
}

impl Material {
    pub(crate) fn new(
        name: String,
        pipeline: PipelineId,
        parent: Option<MaterialKey>,
        textures: Vec<(String, TextureSource)>,
        eager_set: DescriptorSetObject,
    ) -> Self {
        Self {
            name,
            pipeline,
            parent,
            children: Vec::new(),
            textures,
            ids: InstanceIds::default(),
            dirty: DirtyFlag::StructureDirty,
            released: false,
            descriptor_sets: vec![Some(ChunkDescriptorSet {
                object: eager_set,
                written: false,
            })],
        }
    }

    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipeline this material draws with
    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    /// Parent in the clone graph, `None` for a root
    pub fn parent(&self) -> Option<MaterialKey> {
        self.parent
    }

    /// Direct clones of this material
    pub fn children(&self) -> &[MaterialKey] {
        &self.children
    }

    /// Whether this is a root material
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Current dirty flag
    pub fn dirty_flag(&self) -> DirtyFlag {
        self.dirty
    }

    /// Texture bound to `name`
    pub fn texture(&self, name: &str) -> Option<TextureSource> {
        self.textures
            .iter()
            .find(|(texture, _)| texture == name)
            .map(|(_, source)| *source)
    }

    /// Live instances created from this material
    pub fn live_instances(&self) -> usize {
        self.ids.live_count()
    }

    /// Whether the material is waiting to be pruned
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Descriptor set reserved for uniform chunk `chunk`, if any
    pub fn descriptor_set(&self, chunk: usize) -> Option<DescriptorSetObject> {
        self.descriptor_sets
            .get(chunk)
            .copied()
            .flatten()
            .map(|set| set.object)
    }

    pub(crate) fn invalidate_descriptor_sets(&mut self) {
        for set in self.descriptor_sets.iter_mut().flatten() {
            set.written = false;
        }
    }

    pub(crate) fn take_descriptor_sets(&mut self) -> Vec<DescriptorSetObject> {
        self.descriptor_sets
            .drain(..)
            .flatten()
            .map(|set| set.object)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_flag_merge_is_monotonic() {
        assert_eq!(DirtyFlag::Clean.merge(DirtyFlag::InstanceDirty), DirtyFlag::InstanceDirty);
        assert_eq!(DirtyFlag::StructureDirty.merge(DirtyFlag::Clean), DirtyFlag::StructureDirty);
        assert_eq!(DirtyFlag::default(), DirtyFlag::Clean);
    }

    #[test]
    fn test_instance_ids_reuse_freed_ids() {
        let mut ids = InstanceIds::default();
        let (a, gen_a) = ids.allocate();
        let (b, _) = ids.allocate();
        assert_eq!((a, b), (0, 1));

        ids.release(a, gen_a).unwrap();
        assert!(ids.release(a, gen_a).is_err());

        let (reused, gen_reused) = ids.allocate();
        assert_eq!(reused, 0);
        assert_ne!(gen_reused, gen_a);
        assert!(!ids.is_live(a, gen_a));
        assert_eq!(ids.cursor(), 2);
        assert_eq!(ids.live_ids().collect::<Vec<_>>(), vec![0, 1]);
    }
}
