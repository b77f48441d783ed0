//! Uniform buffer layouts
//!
//! A layout is the CPU-side description of one uniform block: named fields
//! with their shader types, placed with std140 rules. Layouts are immutable
//! once built and shared through `Arc` by every pool, backing buffer and
//! material that uses them.

use serde::{Deserialize, Serialize};

use crate::render::material::MaterialError;
use crate::render::pools::MAX_CHUNK_BYTES;

/// Shader-side type of a uniform field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderType {
    /// `float`
    Float,
    /// `vec2`
    Vec2,
    /// `vec3`
    Vec3,
    /// `vec4`
    Vec4,
    /// `int`
    Int,
    /// `ivec2`
    IVec2,
    /// `ivec3`
    IVec3,
    /// `ivec4`
    IVec4,
    /// `uint`
    UInt,
    /// `bool` (32 bits in a uniform block)
    Bool,
    /// `mat3`, stored as three padded `vec4` columns
    Mat3,
    /// `mat4`
    Mat4,
}

impl ShaderType {
    /// Size in bytes inside a std140 block
    pub const fn size(self) -> u32 {
        match self {
            Self::Float | Self::Int | Self::UInt | Self::Bool => 4,
            Self::Vec2 | Self::IVec2 => 8,
            Self::Vec3 | Self::IVec3 => 12,
            Self::Vec4 | Self::IVec4 => 16,
            Self::Mat3 => 48,
            Self::Mat4 => 64,
        }
    }

    /// Base alignment inside a std140 block
    pub const fn alignment(self) -> u32 {
        match self {
            Self::Float | Self::Int | Self::UInt | Self::Bool => 4,
            Self::Vec2 | Self::IVec2 => 8,
            Self::Vec3 | Self::IVec3 | Self::Vec4 | Self::IVec4 | Self::Mat3 | Self::Mat4 => 16,
        }
    }
}

/// One named field of a uniform block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBufferElement {
    /// Field name as used by `set_variable`
    pub name: String,
    /// Declared shader type
    pub shader_type: ShaderType,
    /// Byte offset inside the block
    pub offset: u32,
    /// Byte size
    pub size: u32,
}

/// Immutable description of a uniform block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBufferLayout {
    name: String,
    elements: Vec<UniformBufferElement>,
    size: u32,
}

impl UniformBufferLayout {
    /// Start building a layout called `name`
    pub fn builder(name: impl Into<String>) -> UniformBufferLayoutBuilder {
        UniformBufferLayoutBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Block name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order
    pub fn elements(&self) -> &[UniformBufferElement] {
        &self.elements
    }

    /// Field by name
    pub fn element(&self, name: &str) -> Option<&UniformBufferElement> {
        self.elements.iter().find(|element| element.name == name)
    }

    /// Position of a field by name
    pub fn element_index(&self, name: &str) -> Option<usize> {
        self.elements.iter().position(|element| element.name == name)
    }

    /// Block size, rounded up to 16 bytes
    pub fn size(&self) -> u32 {
        self.size
    }
}

/// Builder for [`UniformBufferLayout`]
#[derive(Debug, Clone)]
pub struct UniformBufferLayoutBuilder {
    name: String,
    fields: Vec<(String, ShaderType)>,
}

impl UniformBufferLayoutBuilder {
    /// Append a field
    pub fn field(mut self, name: impl Into<String>, shader_type: ShaderType) -> Self {
        self.fields.push((name.into(), shader_type));
        self
    }

    /// Place every field and validate the result
    pub fn build(self) -> Result<UniformBufferLayout, MaterialError> {
        let invalid = |reason: String| MaterialError::InvalidLayout {
            layout: self.name.clone(),
            reason,
        };

        if self.fields.is_empty() {
            return Err(invalid("layout has no fields".to_string()));
        }

        let mut elements: Vec<UniformBufferElement> = Vec::with_capacity(self.fields.len());
        let mut offset = 0u64;
        for (name, shader_type) in &self.fields {
            if elements.iter().any(|element| &element.name == name) {
                return Err(invalid(format!("duplicate field '{name}'")));
            }
            let alignment = u64::from(shader_type.alignment());
            offset = (offset + alignment - 1) / alignment * alignment;
            elements.push(UniformBufferElement {
                name: name.clone(),
                shader_type: *shader_type,
                offset: u32::try_from(offset).map_err(|_| invalid("layout too large".to_string()))?,
                size: shader_type.size(),
            });
            offset += u64::from(shader_type.size());
        }

        let size = (offset + 15) / 16 * 16;
        if size > MAX_CHUNK_BYTES {
            return Err(invalid(format!(
                "block of {size} bytes exceeds the {MAX_CHUNK_BYTES}-byte uniform range"
            )));
        }

        Ok(UniformBufferLayout {
            elements,
            // Bounded by MAX_CHUNK_BYTES above.
            size: size as u32,
            name: self.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std140_offsets() {
        let layout = UniformBufferLayout::builder("Lighting")
            .field("intensity", ShaderType::Float)
            .field("direction", ShaderType::Vec3)
            .field("ambient", ShaderType::Float)
            .field("uv_scale", ShaderType::Vec2)
            .field("normal_matrix", ShaderType::Mat3)
            .build()
            .unwrap();

        let offsets: Vec<u32> = layout.elements().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 16, 28, 32, 48]);
        assert_eq!(layout.size(), 96);
        assert_eq!(layout.element("uv_scale").map(|e| e.size), Some(8));
        assert_eq!(layout.element_index("normal_matrix"), Some(4));
    }

    #[test]
    fn test_size_rounds_to_sixteen() {
        let layout = UniformBufferLayout::builder("Tint")
            .field("alpha", ShaderType::Float)
            .build()
            .unwrap();
        assert_eq!(layout.size(), 16);
    }

    #[test]
    fn test_invalid_layouts_are_rejected() {
        assert!(UniformBufferLayout::builder("Empty").build().is_err());

        let duplicate = UniformBufferLayout::builder("Dup")
            .field("a", ShaderType::Float)
            .field("a", ShaderType::Vec4)
            .build();
        assert!(matches!(duplicate, Err(MaterialError::InvalidLayout { .. })));

        let mut huge = UniformBufferLayout::builder("Huge");
        for i in 0..1025 {
            huge = huge.field(format!("m{i}"), ShaderType::Mat4);
        }
        assert!(huge.build().is_err());
    }
}
