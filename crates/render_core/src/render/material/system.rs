//! Material arena and graph operations

use std::sync::Arc;

use bytemuck::Pod;
use slotmap::{SecondaryMap, SlotMap};

use crate::core::config::RenderCoreConfig;
use crate::render::api::{DescriptorSetLayoutHandle, DeviceRef};
use crate::render::material::material::ChunkDescriptorSet;
use crate::render::material::storage::{SharedStorage, StorageSettings};
use crate::render::material::{
    BackingBuffer, DirtyFlag, DrawBinding, Material, MaterialCreateInfo, MaterialError,
    MaterialInstance, MaterialKey, TextureSource, UniformBufferLayout,
};
use crate::render::pools::UniformBufferPool;
use crate::render::RenderResult;

/// Owns every material, and through each root, its GPU storage
///
/// All operations run on the render thread. The device is passed in at
/// construction and shared with the pools the system creates.
pub struct MaterialSystem {
    device: DeviceRef,
    settings: StorageSettings,
    materials: SlotMap<MaterialKey, Material>,
    storages: SecondaryMap<MaterialKey, SharedStorage>,
}

impl MaterialSystem {
    /// Create an empty system using the pool sizes in `config`
    pub fn new(device: DeviceRef, config: &RenderCoreConfig) -> RenderResult<Self> {
        config.validate()?;
        Ok(Self {
            device,
            settings: StorageSettings {
                uniform_chunk_size: config.pools.uniform_chunk_size,
                descriptor_chunk_size: config.pools.descriptor_chunk_size,
                min_uniform_alignment: config.pools.min_uniform_alignment,
                backing_block_size: config.materials.backing_block_size,
            },
            materials: SlotMap::with_key(),
            storages: SecondaryMap::new(),
        })
    }

    /// Create an empty system with default pool sizes
    pub fn with_defaults(device: DeviceRef) -> RenderResult<Self> {
        Self::new(device, &RenderCoreConfig::default())
    }

    /// Create a root material
    ///
    /// Builds the descriptor-set layout and the uniform pools, and reserves
    /// one descriptor set straight away.
    pub fn create_material(&mut self, info: MaterialCreateInfo) -> RenderResult<MaterialKey> {
        let mut storage = SharedStorage::new(&self.device, &info, self.settings)?;
        let eager_set = storage.descriptor_sets().acquire()?;

        let layouts = info.uniform_layouts.len();
        let textures = info.textures.len();
        let key = self.materials.insert(Material::new(
            info.name,
            info.pipeline,
            None,
            info.textures,
            eager_set,
        ));
        self.storages.insert(key, storage);

        log::debug!(
            "Created material {:?} ({} uniform blocks, {} textures)",
            key,
            layouts,
            textures
        );
        Ok(key)
    }

    /// Create a clone of `parent` sharing its root's layout and storage
    pub fn clone_material(&mut self, parent: MaterialKey) -> RenderResult<MaterialKey> {
        let root = self.root_ancestor(parent)?;
        let source = self.node(parent)?;
        let (name, pipeline, textures) =
            (source.name.clone(), source.pipeline, source.textures.clone());

        let storage = self
            .storages
            .get_mut(root)
            .ok_or(MaterialError::MissingStorage(root))?;
        let eager_set = storage.descriptor_sets().acquire()?;

        let key = self
            .materials
            .insert(Material::new(name, pipeline, Some(parent), textures, eager_set));
        if let Some(parent_node) = self.materials.get_mut(parent) {
            parent_node.children.push(key);
        }
        log::debug!("Cloned material {:?} from {:?}", key, parent);
        Ok(key)
    }

    /// Walk parent links up to the material owning the shared storage
    pub fn root_ancestor(&self, key: MaterialKey) -> Result<MaterialKey, MaterialError> {
        let mut current = key;
        while let Some(parent) = self.node(current)?.parent {
            current = parent;
        }
        Ok(current)
    }

    /// Create an instance of `material`
    ///
    /// A freed id is reused before the material's cursor advances. The id
    /// indexes the backing storage and every uniform pool of the family.
    pub fn create_instance(&mut self, material: MaterialKey) -> RenderResult<MaterialInstance> {
        let (node, storage) = self.family_mut(material)?;
        let (instance_id, generation) = node.ids.allocate();
        let ubos = match storage.retain_id(instance_id) {
            Ok(ubos) => ubos,
            Err(e) => {
                node.ids.unallocate(instance_id);
                return Err(e);
            }
        };
        node.dirty = node.dirty.merge(DirtyFlag::InstanceDirty);

        Ok(MaterialInstance {
            material,
            instance_id,
            generation,
            ubos,
        })
    }

    /// Return an instance's id to its material
    ///
    /// The pool slots for the id are released once no material in the family
    /// has a live instance with it. Backing memory is kept.
    pub fn destroy_instance(&mut self, instance: &MaterialInstance) -> RenderResult<()> {
        let (node, storage) = self.family_mut(instance.material)?;
        node.ids.release(instance.instance_id, instance.generation)?;
        storage.release_id(instance.instance_id)
    }

    /// Write a typed value to a named variable of an instance
    pub fn set_variable<T: Pod>(
        &mut self,
        instance: &MaterialInstance,
        name: &str,
        value: &T,
    ) -> RenderResult<()> {
        self.set_bytes(instance, name, bytemuck::bytes_of(value))
    }

    /// Read a named variable of an instance as `T`
    pub fn get_variable<T: Pod>(&self, instance: &MaterialInstance, name: &str) -> RenderResult<T> {
        let bytes = self.get_bytes(instance, name)?;
        bytemuck::try_pod_read_unaligned(&bytes).map_err(|_| {
            MaterialError::SizeMismatch {
                name: name.to_string(),
                expected: bytes.len() as u32,
                actual: std::mem::size_of::<T>(),
            }
            .into()
        })
    }

    /// Write raw bytes to a named variable; the length must match exactly
    pub fn set_bytes(
        &mut self,
        instance: &MaterialInstance,
        name: &str,
        bytes: &[u8],
    ) -> RenderResult<()> {
        let (node, storage) = self.live_family_mut(instance)?;
        let location = storage
            .variable(name)
            .ok_or_else(|| MaterialError::UnknownVariable {
                material: node.name.clone(),
                name: name.to_string(),
            })?;
        if bytes.len() != location.size as usize {
            return Err(MaterialError::SizeMismatch {
                name: name.to_string(),
                expected: location.size,
                actual: bytes.len(),
            }
            .into());
        }
        storage.write_variable(instance.instance_id, location, bytes);
        node.dirty = node.dirty.merge(DirtyFlag::InstanceDirty);
        Ok(())
    }

    /// Copy of a named variable's bytes
    pub fn get_bytes(&self, instance: &MaterialInstance, name: &str) -> RenderResult<Vec<u8>> {
        let node = self.node(instance.material)?;
        if !node.ids.is_live(instance.instance_id, instance.generation) {
            return Err(stale(instance).into());
        }
        let storage = self.storage(instance.material)?;
        let location = storage
            .variable(name)
            .ok_or_else(|| MaterialError::UnknownVariable {
                material: node.name.clone(),
                name: name.to_string(),
            })?;
        Ok(storage
            .read_variable(instance.instance_id, location)
            .map(<[u8]>::to_vec)
            .unwrap_or_default())
    }

    /// Bind a different image to a named texture slot of `material`
    pub fn set_texture(
        &mut self,
        material: MaterialKey,
        name: &str,
        source: TextureSource,
    ) -> RenderResult<()> {
        let (node, storage) = self.family_mut(material)?;
        if !storage.has_texture(name) {
            return Err(MaterialError::UnknownTexture {
                material: node.name.clone(),
                name: name.to_string(),
            }
            .into());
        }
        match node.textures.iter_mut().find(|(texture, _)| texture == name) {
            Some(entry) => entry.1 = source,
            None => node.textures.push((name.to_string(), source)),
        }
        node.dirty = node.dirty.merge(DirtyFlag::StructureDirty);
        Ok(())
    }

    /// Merge `flag` into `key` and every material cloned from it
    pub fn set_dirty_flag(&mut self, key: MaterialKey, flag: DirtyFlag) -> Result<(), MaterialError> {
        for member in self.subtree(key)? {
            if let Some(node) = self.materials.get_mut(member) {
                node.dirty = node.dirty.merge(flag);
            }
        }
        Ok(())
    }

    /// Everything the driver needs to draw with `instance`
    ///
    /// Uploads the instance's data if it changed, and writes the material's
    /// descriptor set for the instance's uniform chunk if it is missing or the
    /// material is structure-dirty.
    pub fn prepare_draw(&mut self, instance: &MaterialInstance) -> RenderResult<DrawBinding> {
        let id = instance.instance_id;
        let (node, storage) = self.live_family_mut(instance)?;

        if node.dirty == DirtyFlag::StructureDirty {
            node.invalidate_descriptor_sets();
        }
        storage.upload(id)?;

        let chunk = storage.chunk_of(id);
        if node.descriptor_sets.len() <= chunk {
            node.descriptor_sets.resize(chunk + 1, None);
        }
        let mut set = match node.descriptor_sets[chunk] {
            Some(set) => set,
            None => ChunkDescriptorSet {
                object: storage.descriptor_sets().acquire()?,
                written: false,
            },
        };
        if !set.written {
            storage.write_descriptor_set(set.object.set, chunk, &node.textures)?;
            set.written = true;
            log::debug!("Wrote descriptor set for chunk {} of '{}'", chunk, node.name);
        }
        node.descriptor_sets[chunk] = Some(set);

        if node.dirty != DirtyFlag::Clean {
            node.dirty = if node.ids.live_ids().any(|live| storage.is_pending(live)) {
                DirtyFlag::InstanceDirty
            } else {
                DirtyFlag::Clean
            };
        }

        Ok(DrawBinding {
            pipeline: node.pipeline,
            descriptor_set: set.object.set,
            dynamic_offsets: storage.dynamic_offsets(id),
        })
    }

    /// Upload every pending instance of `key`'s family
    ///
    /// Returns how many instance ids were written. Instance-dirty materials
    /// in the family become clean.
    pub fn flush(&mut self, key: MaterialKey) -> RenderResult<usize> {
        let root = self.root_ancestor(key)?;
        let uploaded = self
            .storages
            .get_mut(root)
            .ok_or(MaterialError::MissingStorage(root))?
            .upload_all()?;
        for member in self.subtree(root)? {
            if let Some(node) = self.materials.get_mut(member) {
                if node.dirty == DirtyFlag::InstanceDirty {
                    node.dirty = DirtyFlag::Clean;
                }
            }
        }
        Ok(uploaded)
    }

    /// Throw away all derived GPU state under `key`
    ///
    /// Every material in the subtree becomes structure-dirty and every live
    /// instance is queued for upload again.
    pub fn reset(&mut self, key: MaterialKey) -> Result<(), MaterialError> {
        let root = self.root_ancestor(key)?;
        for member in self.subtree(key)? {
            let (Some(node), Some(storage)) =
                (self.materials.get_mut(member), self.storages.get_mut(root))
            else {
                continue;
            };
            node.dirty = DirtyFlag::StructureDirty;
            node.invalidate_descriptor_sets();
            for id in node.ids.live_ids() {
                storage.mark_pending(id);
            }
        }
        log::debug!("Reset material subtree {:?}", key);
        Ok(())
    }

    /// Mark `key` for removal by the next [`Self::prune`]
    pub fn release_material(&mut self, key: MaterialKey) -> Result<(), MaterialError> {
        self.node_mut(key)?.released = true;
        Ok(())
    }

    /// Remove released materials under `key` that have no live instances
    /// and no remaining clones
    ///
    /// Children are visited before their parents, so a released chain is
    /// removed in one call. Removing a root frees the family's storage.
    /// Returns the number of materials removed.
    pub fn prune(&mut self, key: MaterialKey) -> RenderResult<usize> {
        let root = self.root_ancestor(key)?;
        let order = self.subtree(key)?;
        let mut pruned = 0;

        for &member in order.iter().rev() {
            let removable = self.materials.get(member).is_some_and(|node| {
                node.released && node.live_instances() == 0 && node.children.is_empty()
            });
            if !removable {
                continue;
            }
            let Some(mut node) = self.materials.remove(member) else {
                continue;
            };

            if let Some(storage) = self.storages.get_mut(root) {
                for set in node.take_descriptor_sets() {
                    storage.descriptor_sets().release(set)?;
                }
            }
            match node.parent {
                Some(parent) => {
                    if let Some(parent_node) = self.materials.get_mut(parent) {
                        parent_node.children.retain(|&child| child != member);
                    }
                }
                None => {
                    self.storages.remove(member);
                    log::debug!("Freed shared storage of root material {:?}", member);
                }
            }
            pruned += 1;
        }

        if pruned > 0 {
            log::debug!("Pruned {} materials under {:?}", pruned, key);
        }
        Ok(pruned)
    }

    /// Release `key` and prune its family
    pub fn destroy_material(&mut self, key: MaterialKey) -> RenderResult<usize> {
        let root = self.root_ancestor(key)?;
        self.release_material(key)?;
        self.prune(root)
    }

    /// Material by key
    pub fn material(&self, key: MaterialKey) -> Option<&Material> {
        self.materials.get(key)
    }

    /// Number of materials in the arena
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Live instances of `key`
    pub fn live_instances(&self, key: MaterialKey) -> Result<usize, MaterialError> {
        Ok(self.node(key)?.live_instances())
    }

    /// Direct clones of `key`
    pub fn children(&self, key: MaterialKey) -> Result<&[MaterialKey], MaterialError> {
        Ok(self.node(key)?.children())
    }

    /// Dirty flag of `key`
    pub fn dirty_flag(&self, key: MaterialKey) -> Result<DirtyFlag, MaterialError> {
        Ok(self.node(key)?.dirty)
    }

    /// Descriptor set layout shared by `key`'s family
    pub fn set_layout(&self, key: MaterialKey) -> Result<DescriptorSetLayoutHandle, MaterialError> {
        Ok(self.storage(key)?.set_layout())
    }

    /// Uniform blocks of `key`'s family, in binding order
    pub fn uniform_layouts(
        &self,
        key: MaterialKey,
    ) -> Result<Vec<Arc<UniformBufferLayout>>, MaterialError> {
        Ok(self.storage(key)?.uniform_layouts().cloned().collect())
    }

    /// Uniform pool of block `block` in `key`'s family
    pub fn uniform_pool(&self, key: MaterialKey, block: usize) -> Option<&UniformBufferPool> {
        self.storage(key).ok()?.uniform_pool(block)
    }

    /// Backing storage of block `block` in `key`'s family
    pub fn backing(&self, key: MaterialKey, block: usize) -> Option<&BackingBuffer> {
        self.storage(key).ok()?.backing(block)
    }

    /// Ids with allocated pool slots anywhere in `key`'s family
    pub fn family_ids(&self, key: MaterialKey) -> Result<Vec<u32>, MaterialError> {
        Ok(self.storage(key)?.live_ids().collect())
    }

    /// Device the system allocates from
    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    fn node(&self, key: MaterialKey) -> Result<&Material, MaterialError> {
        self.materials
            .get(key)
            .ok_or(MaterialError::UnknownMaterial(key))
    }

    fn node_mut(&mut self, key: MaterialKey) -> Result<&mut Material, MaterialError> {
        self.materials
            .get_mut(key)
            .ok_or(MaterialError::UnknownMaterial(key))
    }

    fn storage(&self, key: MaterialKey) -> Result<&SharedStorage, MaterialError> {
        let root = self.root_ancestor(key)?;
        self.storages
            .get(root)
            .ok_or(MaterialError::MissingStorage(root))
    }

    fn family_mut(
        &mut self,
        key: MaterialKey,
    ) -> Result<(&mut Material, &mut SharedStorage), MaterialError> {
        let root = self.root_ancestor(key)?;
        let node = self
            .materials
            .get_mut(key)
            .ok_or(MaterialError::UnknownMaterial(key))?;
        let storage = self
            .storages
            .get_mut(root)
            .ok_or(MaterialError::MissingStorage(root))?;
        Ok((node, storage))
    }

    fn live_family_mut(
        &mut self,
        instance: &MaterialInstance,
    ) -> Result<(&mut Material, &mut SharedStorage), MaterialError> {
        let (node, storage) = self.family_mut(instance.material)?;
        if !node.ids.is_live(instance.instance_id, instance.generation) {
            return Err(stale(instance));
        }
        Ok((node, storage))
    }

    // Pre-order: every material comes before the materials cloned from it.
    fn subtree(&self, key: MaterialKey) -> Result<Vec<MaterialKey>, MaterialError> {
        self.node(key)?;
        let mut order = Vec::new();
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            order.push(current);
            if let Some(node) = self.materials.get(current) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        Ok(order)
    }
}

fn stale(instance: &MaterialInstance) -> MaterialError {
    MaterialError::StaleInstance {
        instance_id: instance.instance_id,
        generation: instance.generation,
    }
}

impl std::fmt::Debug for MaterialSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterialSystem")
            .field("backend", &self.device.backend())
            .field("materials", &self.materials.len())
            .field("families", &self.storages.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::{DescriptorResource, ImageViewHandle, SamplerHandle};
    use crate::render::backends::headless::{HeadlessDevice, ResourceKind};
    use crate::render::material::ShaderType;
    use crate::render::target::PipelineId;
    use crate::render::RenderError;

    fn config() -> RenderCoreConfig {
        let mut config = RenderCoreConfig::default();
        config.pools.uniform_chunk_size = 4;
        config.pools.descriptor_chunk_size = 4;
        config.pools.min_uniform_alignment = 16;
        config
    }

    fn surface_layout() -> Arc<UniformBufferLayout> {
        Arc::new(
            UniformBufferLayout::builder("Surface")
                .field("color", ShaderType::Vec4)
                .field("x", ShaderType::Float)
                .build()
                .unwrap(),
        )
    }

    fn albedo(view: u64) -> TextureSource {
        TextureSource {
            image_view: ImageViewHandle(view),
            sampler: SamplerHandle(1),
        }
    }

    fn setup() -> (Arc<HeadlessDevice>, MaterialSystem, MaterialKey) {
        let device = Arc::new(HeadlessDevice::new());
        let mut system = MaterialSystem::new(device.clone(), &config()).unwrap();
        let info = MaterialCreateInfo::new("lit", PipelineId(0))
            .with_uniform(surface_layout())
            .with_texture("albedo", albedo(100));
        let root = system.create_material(info).unwrap();
        (device, system, root)
    }

    #[test]
    fn test_construction_reserves_descriptor_set() {
        let (device, system, root) = setup();
        assert!(system.material(root).unwrap().descriptor_set(0).is_some());
        assert_eq!(device.live_count(ResourceKind::DescriptorSetLayout), 1);
        assert_eq!(device.live_count(ResourceKind::DescriptorPool), 1);
        assert_eq!(device.live_count(ResourceKind::Buffer), 0);
    }

    #[test]
    fn test_instance_isolation() {
        let (_device, mut system, root) = setup();
        let a = system.create_instance(root).unwrap();
        let b = system.create_instance(root).unwrap();
        assert_ne!(a.instance_id(), b.instance_id());

        system.set_variable(&a, "x", &1.0f32).unwrap();
        system.set_variable(&b, "x", &2.0f32).unwrap();

        let read_a: f32 = system.get_variable(&a, "x").unwrap();
        let read_b: f32 = system.get_variable(&b, "x").unwrap();
        approx::assert_relative_eq!(read_a, 1.0);
        approx::assert_relative_eq!(read_b, 2.0);
    }

    #[test]
    fn test_clones_share_root_storage() {
        let (_device, mut system, root) = setup();
        let left = system.clone_material(root).unwrap();
        let right = system.clone_material(root).unwrap();
        let grandchild = system.clone_material(right).unwrap();
        assert_eq!(system.root_ancestor(grandchild).unwrap(), root);

        let from_left = system.create_instance(left).unwrap();
        let from_grandchild = system.create_instance(grandchild).unwrap();
        assert_eq!(from_left.instance_id(), from_grandchild.instance_id());

        system.set_variable(&from_left, "color", &[0.25f32, 0.5, 0.75, 1.0]).unwrap();
        let color: [f32; 4] = system.get_variable(&from_grandchild, "color").unwrap();
        assert_eq!(color, [0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_shared_id_slot_released_with_last_instance() {
        let (_device, mut system, root) = setup();
        let clone = system.clone_material(root).unwrap();
        let a = system.create_instance(root).unwrap();
        let b = system.create_instance(clone).unwrap();
        assert_eq!(a.instance_id(), b.instance_id());
        assert_eq!(system.uniform_pool(root, 0).unwrap().live_count(), 1);

        system.destroy_instance(&a).unwrap();
        assert_eq!(system.uniform_pool(root, 0).unwrap().live_count(), 1);
        let still_visible: [f32; 4] = system.get_variable(&b, "color").unwrap();
        assert_eq!(still_visible, [0.0; 4]);

        system.destroy_instance(&b).unwrap();
        assert_eq!(system.uniform_pool(root, 0).unwrap().live_count(), 0);
        assert!(system.family_ids(root).unwrap().is_empty());
    }

    #[test]
    fn test_freed_id_is_reused_and_zeroed() {
        let (_device, mut system, root) = setup();
        let first = system.create_instance(root).unwrap();
        let _second = system.create_instance(root).unwrap();
        system.set_variable(&first, "x", &9.0f32).unwrap();
        system.destroy_instance(&first).unwrap();

        let reused = system.create_instance(root).unwrap();
        assert_eq!(reused.instance_id(), first.instance_id());
        let x: f32 = system.get_variable(&reused, "x").unwrap();
        approx::assert_relative_eq!(x, 0.0);
        assert_eq!(system.uniform_pool(root, 0).unwrap().cursor(), 2);
    }

    #[test]
    fn test_stale_instance_is_rejected() {
        let (_device, mut system, root) = setup();
        let instance = system.create_instance(root).unwrap();
        let copy = instance.clone();
        system.destroy_instance(&instance).unwrap();

        let err = system.destroy_instance(&copy).unwrap_err();
        assert!(matches!(err, RenderError::Material(MaterialError::StaleInstance { .. })));
        assert!(system.set_variable(&copy, "x", &1.0f32).is_err());
        assert!(system.get_variable::<f32>(&copy, "x").is_err());
    }

    #[test]
    fn test_lookup_and_size_errors() {
        let (_device, mut system, root) = setup();
        let instance = system.create_instance(root).unwrap();

        let err = system.set_variable(&instance, "missing", &1.0f32).unwrap_err();
        assert!(matches!(err, RenderError::Material(MaterialError::UnknownVariable { .. })));

        let err = system.set_variable(&instance, "x", &1.0f64).unwrap_err();
        assert!(matches!(
            err,
            RenderError::Material(MaterialError::SizeMismatch { expected: 4, actual: 8, .. })
        ));

        assert!(system.get_variable::<[f32; 2]>(&instance, "x").is_err());
        assert!(system.set_texture(root, "normal", albedo(5)).is_err());
    }

    #[test]
    fn test_prepare_draw_uploads_and_binds() {
        let (device, mut system, root) = setup();
        let instances: Vec<_> = (0..6).map(|_| system.create_instance(root).unwrap()).collect();
        system.set_variable(&instances[5], "x", &3.5f32).unwrap();

        let binding = system.prepare_draw(&instances[5]).unwrap();
        assert_eq!(binding.pipeline, PipelineId(0));
        // chunk size 4, stride 32
        assert_eq!(binding.dynamic_offsets, vec![32]);

        let pool = system.uniform_pool(root, 0).unwrap();
        let bytes = pool.read(&instances[5].ubos()[0]).unwrap();
        let x: f32 = bytemuck::pod_read_unaligned(&bytes[16..20]);
        approx::assert_relative_eq!(x, 3.5);

        match device.descriptor_binding(binding.descriptor_set, 0) {
            Some(DescriptorResource::Buffer { buffer, range, .. }) => {
                assert_eq!(Some(buffer), pool.chunk_buffer(1));
                assert_eq!(range, 32);
            }
            other => panic!("unexpected binding {other:?}"),
        }
        assert_eq!(
            device.descriptor_binding(binding.descriptor_set, 1),
            Some(DescriptorResource::Image {
                view: ImageViewHandle(100),
                sampler: SamplerHandle(1),
            })
        );

        let first = system.prepare_draw(&instances[0]).unwrap();
        assert_ne!(first.descriptor_set, binding.descriptor_set);
        assert_eq!(
            system.material(root).unwrap().descriptor_set(0).map(|s| s.set),
            Some(first.descriptor_set)
        );
    }

    #[test]
    fn test_texture_change_rewrites_descriptor_set() {
        let (device, mut system, root) = setup();
        let instance = system.create_instance(root).unwrap();
        let binding = system.prepare_draw(&instance).unwrap();
        assert_eq!(system.dirty_flag(root).unwrap(), DirtyFlag::Clean);

        system.set_texture(root, "albedo", albedo(200)).unwrap();
        assert_eq!(system.dirty_flag(root).unwrap(), DirtyFlag::StructureDirty);
        system.prepare_draw(&instance).unwrap();

        assert!(matches!(
            device.descriptor_binding(binding.descriptor_set, 1),
            Some(DescriptorResource::Image { view: ImageViewHandle(200), .. })
        ));
    }

    #[test]
    fn test_dirty_flag_propagates_to_clones() {
        let (_device, mut system, root) = setup();
        let child = system.clone_material(root).unwrap();
        let grandchild = system.clone_material(child).unwrap();
        let sibling = system.clone_material(root).unwrap();
        for key in [root, child, grandchild, sibling] {
            let instance = system.create_instance(key).unwrap();
            system.prepare_draw(&instance).unwrap();
            system.flush(key).unwrap();
        }

        system.set_dirty_flag(child, DirtyFlag::InstanceDirty).unwrap();
        assert_eq!(system.dirty_flag(root).unwrap(), DirtyFlag::Clean);
        assert_eq!(system.dirty_flag(child).unwrap(), DirtyFlag::InstanceDirty);
        assert_eq!(system.dirty_flag(grandchild).unwrap(), DirtyFlag::InstanceDirty);
        assert_eq!(system.dirty_flag(sibling).unwrap(), DirtyFlag::Clean);
    }

    #[test]
    fn test_reset_requeues_uploads() {
        let (_device, mut system, root) = setup();
        let instance = system.create_instance(root).unwrap();
        system.prepare_draw(&instance).unwrap();
        assert_eq!(system.flush(root).unwrap(), 0);

        system.reset(root).unwrap();
        assert_eq!(system.dirty_flag(root).unwrap(), DirtyFlag::StructureDirty);
        assert_eq!(system.flush(root).unwrap(), 1);
    }

    #[test]
    fn test_prune_removes_released_subtree() {
        let (device, mut system, root) = setup();
        let child = system.clone_material(root).unwrap();
        let grandchild = system.clone_material(child).unwrap();
        let instance = system.create_instance(grandchild).unwrap();

        system.release_material(child).unwrap();
        system.release_material(grandchild).unwrap();
        assert_eq!(system.prune(root).unwrap(), 0);

        system.destroy_instance(&instance).unwrap();
        assert_eq!(system.prune(root).unwrap(), 2);
        assert_eq!(system.material_count(), 1);
        assert!(system.children(root).unwrap().is_empty());
        assert!(matches!(
            system.create_instance(child),
            Err(RenderError::Material(MaterialError::UnknownMaterial(_)))
        ));

        assert_eq!(system.destroy_material(root).unwrap(), 1);
        assert_eq!(system.material_count(), 0);
        assert_eq!(device.total_live(), 0);
        assert_eq!(device.invalid_operation_count(), 0);
    }

    #[test]
    fn test_backing_grows_with_instance_ids() {
        let device = Arc::new(HeadlessDevice::new());
        let mut config = config();
        config.materials.backing_block_size = 64;
        let mut system = MaterialSystem::new(device, &config).unwrap();
        let root = system
            .create_material(MaterialCreateInfo::new("small", PipelineId(1)).with_uniform(surface_layout()))
            .unwrap();

        let instances: Vec<_> = (0..3).map(|_| system.create_instance(root).unwrap()).collect();
        let backing = system.backing(root, 0).unwrap();
        assert_eq!(backing.element_count(), 2);
        assert_eq!(backing.block_count(), 2);

        system.set_variable(&instances[2], "x", &7.0f32).unwrap();
        let x: f32 = system.get_variable(&instances[2], "x").unwrap();
        approx::assert_relative_eq!(x, 7.0);
        let first: f32 = system.get_variable(&instances[0], "x").unwrap();
        approx::assert_relative_eq!(first, 0.0);
    }

    #[test]
    fn test_wide_uniform_block_fits_default_chunks() {
        let device = Arc::new(HeadlessDevice::new());
        let mut system = MaterialSystem::with_defaults(device.clone()).unwrap();
        let mut builder = UniformBufferLayout::builder("Skinning");
        for i in 0..17 {
            builder = builder.field(format!("bone{i}"), ShaderType::Mat4);
        }
        let layout = Arc::new(builder.build().unwrap());
        assert_eq!(layout.size(), 1088);

        let material = system
            .create_material(MaterialCreateInfo::new("skinned", PipelineId(0)).with_uniform(layout))
            .unwrap();
        let pool = system.uniform_pool(material, 0).unwrap();
        assert_eq!(pool.stride(), 1280);
        assert_eq!(pool.chunk_size(), 51);

        let instances: Vec<_> = (0..52)
            .map(|_| system.create_instance(material).unwrap())
            .collect();
        let first = system.prepare_draw(&instances[0]).unwrap();
        let spill = system.prepare_draw(&instances[51]).unwrap();
        assert_eq!(spill.dynamic_offsets, vec![0]);
        assert_ne!(first.descriptor_set, spill.descriptor_set);
        assert_eq!(system.uniform_pool(material, 0).unwrap().chunk_count(), 2);
        assert_eq!(device.live_count(ResourceKind::Buffer), 2);
    }

    #[test]
    fn test_empty_material_is_rejected() {
        let device = Arc::new(HeadlessDevice::new());
        let mut system = MaterialSystem::new(device.clone(), &config()).unwrap();
        assert!(system
            .create_material(MaterialCreateInfo::new("empty", PipelineId(0)))
            .is_err());
        assert_eq!(device.total_live(), 0);
    }
}
