//! Storage shared by every material of one clone family

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::render::api::{
    DescriptorKind, DescriptorResource, DescriptorSetHandle, DescriptorSetLayoutHandle,
    DescriptorWrite, DeviceRef, LayoutBinding,
};
use crate::render::material::{
    BackingBuffer, MaterialCreateInfo, MaterialError, TextureSource, UniformBufferLayout,
};
use crate::render::pools::{
    DescriptorSetPool, PoolError, UniformBufferObject, UniformBufferPool, MAX_CHUNK_BYTES,
};
use crate::render::{RenderError, RenderResult};

/// Sizes the family's pools are created with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StorageSettings {
    pub uniform_chunk_size: u32,
    pub descriptor_chunk_size: u32,
    pub min_uniform_alignment: u64,
    pub backing_block_size: usize,
}

/// Where a named variable lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VariableLocation {
    pub block: usize,
    pub offset: u32,
    pub size: u32,
}

/// Descriptor set layout destroyed on drop
pub(crate) struct OwnedSetLayout {
    device: DeviceRef,
    handle: DescriptorSetLayoutHandle,
}

impl std::fmt::Debug for OwnedSetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OwnedSetLayout").field(&self.handle).finish()
    }
}

impl Drop for OwnedSetLayout {
    fn drop(&mut self) {
        self.device.destroy_descriptor_set_layout(self.handle);
    }
}

#[derive(Debug)]
struct UniformBlock {
    pool: UniformBufferPool,
    backing: BackingBuffer,
}

/// Layout, uniform pools and backing memory owned by a root material
///
/// Field order matters on drop: pools go before the set layout they were
/// allocated against.
#[derive(Debug)]
pub(crate) struct SharedStorage {
    blocks: Vec<UniformBlock>,
    variables: HashMap<String, VariableLocation>,
    texture_bindings: HashMap<String, u32>,
    descriptor_sets: DescriptorSetPool,
    uniform_chunk_size: u32,
    // live instances per id across the whole family
    id_refs: Vec<u32>,
    gpu_slots: BTreeMap<u32, Vec<UniformBufferObject>>,
    pending_upload: BTreeSet<u32>,
    set_layout: OwnedSetLayout,
}

/// Slots per uniform chunk for every block of the family
///
/// All blocks share one chunk size so an instance id maps to the same chunk
/// in each pool. The configured size shrinks until the widest block's chunk
/// fits [`MAX_CHUNK_BYTES`].
fn family_chunk_size(
    device: &DeviceRef,
    info: &MaterialCreateInfo,
    settings: StorageSettings,
) -> RenderResult<u32> {
    let mut widest = 0;
    for layout in &info.uniform_layouts {
        widest = widest.max(UniformBufferPool::aligned_stride(
            device,
            layout,
            settings.min_uniform_alignment,
        )?);
    }
    if widest > MAX_CHUNK_BYTES {
        return Err(PoolError::Configuration {
            reason: format!(
                "uniform element of {widest} bytes exceeds the {MAX_CHUNK_BYTES}-byte cap"
            ),
        }
        .into());
    }
    let fitting = MAX_CHUNK_BYTES / widest.max(1);
    let chunk_size = u64::from(settings.uniform_chunk_size).min(fitting).max(1);
    if chunk_size < u64::from(settings.uniform_chunk_size) {
        log::debug!(
            "Material '{}' uses {} slots per uniform chunk ({} byte elements)",
            info.name,
            chunk_size,
            widest
        );
    }
    Ok(u32::try_from(chunk_size).unwrap_or(settings.uniform_chunk_size))
}

impl SharedStorage {
    pub fn new(
        device: &DeviceRef,
        info: &MaterialCreateInfo,
        settings: StorageSettings,
    ) -> RenderResult<Self> {
        let invalid = |reason: String| MaterialError::InvalidLayout {
            layout: info.name.clone(),
            reason,
        };
        if info.uniform_layouts.is_empty() && info.textures.is_empty() {
            return Err(invalid("material has no uniforms and no textures".to_string()).into());
        }

        let mut variables = HashMap::new();
        for (block, layout) in info.uniform_layouts.iter().enumerate() {
            for element in layout.elements() {
                let location = VariableLocation {
                    block,
                    offset: element.offset,
                    size: element.size,
                };
                if variables.insert(element.name.clone(), location).is_some() {
                    return Err(invalid(format!("variable '{}' declared twice", element.name)).into());
                }
            }
        }

        let block_count = info.uniform_layouts.len() as u32;
        let mut texture_bindings = HashMap::new();
        for (i, (name, _)) in info.textures.iter().enumerate() {
            if texture_bindings.insert(name.clone(), block_count + i as u32).is_some() {
                return Err(invalid(format!("texture '{name}' declared twice")).into());
            }
        }

        let bindings: Vec<LayoutBinding> = (0..block_count)
            .map(|binding| LayoutBinding::dynamic_uniform(binding, info.stages))
            .chain(
                (0..info.textures.len() as u32).map(|i| {
                    LayoutBinding::combined_image_sampler(block_count + i, info.stages)
                }),
            )
            .collect();

        let set_layout = OwnedSetLayout {
            device: Arc::clone(device),
            handle: device.create_descriptor_set_layout(&bindings)?,
        };

        let uniform_chunk_size = family_chunk_size(device, info, settings)?;
        let blocks = info
            .uniform_layouts
            .iter()
            .map(|layout| {
                Ok(UniformBlock {
                    pool: UniformBufferPool::new(
                        Arc::clone(device),
                        Arc::clone(layout),
                        uniform_chunk_size,
                        settings.min_uniform_alignment,
                    )?,
                    backing: BackingBuffer::new(
                        layout.name(),
                        layout.size(),
                        settings.backing_block_size,
                    )?,
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let descriptor_sets = DescriptorSetPool::new(
            Arc::clone(device),
            set_layout.handle,
            &bindings,
            settings.descriptor_chunk_size,
        )?;

        Ok(Self {
            blocks,
            variables,
            texture_bindings,
            descriptor_sets,
            uniform_chunk_size,
            id_refs: Vec::new(),
            gpu_slots: BTreeMap::new(),
            pending_upload: BTreeSet::new(),
            set_layout,
        })
    }

    /// Take a reference on `id`, acquiring its pool slots on first use
    ///
    /// The first reference zeroes the backing element so a reused id never
    /// shows the previous owner's data.
    pub fn retain_id(&mut self, id: u32) -> RenderResult<Vec<UniformBufferObject>> {
        let index = id as usize;
        if self.id_refs.len() <= index {
            self.id_refs.resize(index + 1, 0);
        }

        if self.id_refs[index] == 0 {
            let mut objects = Vec::with_capacity(self.blocks.len());
            let mut failure = None;
            for block in &mut self.blocks {
                match block.pool.acquire_at(id) {
                    Ok(object) => objects.push(object),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            if let Some(e) = failure {
                for (block, object) in self.blocks.iter_mut().zip(&objects) {
                    block.pool.release(object)?;
                }
                return Err(e);
            }
            for block in &mut self.blocks {
                block.backing.ensure_capacity(id);
                block.backing.clear(id);
            }
            self.gpu_slots.insert(id, objects);
            self.pending_upload.insert(id);
        }

        self.id_refs[index] += 1;
        Ok(self.gpu_slots.get(&id).cloned().unwrap_or_default())
    }

    /// Drop a reference on `id`, releasing its pool slots with the last one
    pub fn release_id(&mut self, id: u32) -> RenderResult<()> {
        let Some(refs) = self.id_refs.get_mut(id as usize).filter(|refs| **refs > 0) else {
            return Err(RenderError::Backend(format!("instance id {id} has no references")));
        };
        *refs -= 1;
        if *refs == 0 {
            if let Some(objects) = self.gpu_slots.remove(&id) {
                for (block, object) in self.blocks.iter_mut().zip(&objects) {
                    block.pool.release(object)?;
                }
            }
            self.pending_upload.remove(&id);
        }
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<VariableLocation> {
        self.variables.get(name).copied()
    }

    pub fn has_texture(&self, name: &str) -> bool {
        self.texture_bindings.contains_key(name)
    }

    pub fn write_variable(&mut self, id: u32, location: VariableLocation, bytes: &[u8]) {
        if let Some(element) = self.blocks[location.block].backing.element_mut(id) {
            let start = location.offset as usize;
            element[start..start + bytes.len()].copy_from_slice(bytes);
            self.pending_upload.insert(id);
        }
    }

    pub fn read_variable(&self, id: u32, location: VariableLocation) -> Option<&[u8]> {
        let start = location.offset as usize;
        self.blocks[location.block]
            .backing
            .element(id)
            .map(|element| &element[start..start + location.size as usize])
    }

    pub fn mark_pending(&mut self, id: u32) {
        if self.gpu_slots.contains_key(&id) {
            self.pending_upload.insert(id);
        }
    }

    pub fn is_pending(&self, id: u32) -> bool {
        self.pending_upload.contains(&id)
    }

    /// Copy the backing bytes of `id` into its pool slots if they changed
    pub fn upload(&mut self, id: u32) -> RenderResult<()> {
        if !self.pending_upload.remove(&id) {
            return Ok(());
        }
        let Some(objects) = self.gpu_slots.get(&id) else {
            return Ok(());
        };
        for (block, object) in self.blocks.iter().zip(objects) {
            if let Some(bytes) = block.backing.element(id) {
                block.pool.write(object, bytes)?;
            }
        }
        Ok(())
    }

    /// Upload every pending id, returning how many were written
    pub fn upload_all(&mut self) -> RenderResult<usize> {
        let pending: Vec<u32> = self.pending_upload.iter().copied().collect();
        for &id in &pending {
            self.upload(id)?;
        }
        Ok(pending.len())
    }

    /// Uniform chunk holding `id`
    pub fn chunk_of(&self, id: u32) -> usize {
        (id / self.uniform_chunk_size) as usize
    }

    pub fn dynamic_offsets(&self, id: u32) -> Vec<u32> {
        self.gpu_slots
            .get(&id)
            .map(|objects| objects.iter().map(|object| object.offset as u32).collect())
            .unwrap_or_default()
    }

    /// Point `set` at chunk `chunk` of every uniform pool and at `textures`
    pub fn write_descriptor_set(
        &self,
        set: DescriptorSetHandle,
        chunk: usize,
        textures: &[(String, TextureSource)],
    ) -> RenderResult<()> {
        let mut writes = Vec::with_capacity(self.blocks.len() + textures.len());
        for (binding, block) in self.blocks.iter().enumerate() {
            let buffer = block.pool.chunk_buffer(chunk).ok_or_else(|| {
                RenderError::Backend(format!(
                    "uniform chunk {chunk} of '{}' does not exist",
                    block.pool.layout().name()
                ))
            })?;
            writes.push(DescriptorWrite {
                set,
                binding: binding as u32,
                kind: DescriptorKind::UniformBufferDynamic,
                resource: DescriptorResource::Buffer {
                    buffer,
                    offset: 0,
                    range: u64::from(block.pool.layout().size()),
                },
            });
        }
        for (name, source) in textures {
            if let Some(&binding) = self.texture_bindings.get(name) {
                writes.push(DescriptorWrite {
                    set,
                    binding,
                    kind: DescriptorKind::CombinedImageSampler,
                    resource: DescriptorResource::Image {
                        view: source.image_view,
                        sampler: source.sampler,
                    },
                });
            }
        }
        self.descriptor_sets.update(&writes);
        Ok(())
    }

    pub fn descriptor_sets(&mut self) -> &mut DescriptorSetPool {
        &mut self.descriptor_sets
    }

    pub fn set_layout(&self) -> DescriptorSetLayoutHandle {
        self.set_layout.handle
    }

    pub fn uniform_layouts(&self) -> impl Iterator<Item = &Arc<UniformBufferLayout>> {
        self.blocks.iter().map(|block| block.pool.layout())
    }

    pub fn uniform_pool(&self, block: usize) -> Option<&UniformBufferPool> {
        self.blocks.get(block).map(|block| &block.pool)
    }

    pub fn backing(&self, block: usize) -> Option<&BackingBuffer> {
        self.blocks.get(block).map(|block| &block.backing)
    }

    pub fn live_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.gpu_slots.keys().copied()
    }
}
