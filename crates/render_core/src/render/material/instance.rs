//! Material instances

use bytemuck::Pod;

use crate::render::api::DescriptorSetHandle;
use crate::render::material::{MaterialKey, MaterialSystem};
use crate::render::pools::UniformBufferObject;
use crate::render::target::PipelineId;
use crate::render::RenderResult;

/// Per-draw handle into a material's shared backing storage
///
/// Created by [`MaterialSystem::create_instance`] and destroyed by
/// [`MaterialSystem::destroy_instance`]. Copies of the handle all refer to
/// the same instance; once it is destroyed every copy is stale.
#[derive(Debug, Clone)]
pub struct MaterialInstance {
    pub(crate) material: MaterialKey,
    pub(crate) instance_id: u32,
    pub(crate) generation: u32,
    pub(crate) ubos: Vec<UniformBufferObject>,
}

impl MaterialInstance {
    /// Material the instance was created from
    pub fn material(&self) -> MaterialKey {
        self.material
    }

    /// Slot index shared by the backing storage and every uniform pool
    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    /// Generation of the id when this handle was issued
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Uniform pool slots, one per uniform block of the material
    pub fn ubos(&self) -> &[UniformBufferObject] {
        &self.ubos
    }

    /// Shorthand for [`MaterialSystem::set_variable`]
    pub fn set_variable<T: Pod>(
        &self,
        system: &mut MaterialSystem,
        name: &str,
        value: &T,
    ) -> RenderResult<()> {
        system.set_variable(self, name, value)
    }

    /// Shorthand for [`MaterialSystem::get_variable`]
    pub fn get_variable<T: Pod>(&self, system: &MaterialSystem, name: &str) -> RenderResult<T> {
        system.get_variable(self, name)
    }
}

/// What the driver binds for one draw call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawBinding {
    /// Pipeline registered with the render target
    pub pipeline: PipelineId,
    /// Material descriptor set
    pub descriptor_set: DescriptorSetHandle,
    /// One dynamic offset per uniform block, in binding order
    pub dynamic_offsets: Vec<u32>,
}
