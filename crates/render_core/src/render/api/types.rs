//! Plain create-info types shared by every graphics device
//!
//! These structs are what the asset layer hands to the core: already-parsed
//! render pass layouts, pipeline descriptions, texture bindings. Nothing in
//! here talks to a GPU.

use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

macro_rules! device_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u64);

        impl $name {
            /// The null handle, never returned by a successful create call
            pub const NULL: Self = Self(0);

            /// Whether this is the null handle
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

device_handle!(
    /// Opaque handle to a device buffer
    BufferHandle
);
device_handle!(
    /// Opaque handle to a descriptor set layout
    DescriptorSetLayoutHandle
);
device_handle!(
    /// Opaque handle to a descriptor pool
    DescriptorPoolHandle
);
device_handle!(
    /// Opaque handle to a descriptor set
    DescriptorSetHandle
);
device_handle!(
    /// Opaque handle to a swapchain
    SwapchainHandle
);
device_handle!(
    /// Opaque handle to a render pass
    RenderPassHandle
);
device_handle!(
    /// Opaque handle to a framebuffer
    FramebufferHandle
);
device_handle!(
    /// Opaque handle to a pipeline layout
    PipelineLayoutHandle
);
device_handle!(
    /// Opaque handle to a graphics pipeline
    PipelineHandle
);
device_handle!(
    /// Opaque handle to an image view owned by the asset layer
    ImageViewHandle
);
device_handle!(
    /// Opaque handle to a sampler owned by the asset layer
    SamplerHandle
);

bitflags! {
    /// Shader stages a binding is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        /// Vertex stage
        const VERTEX = 1 << 0;
        /// Fragment stage
        const FRAGMENT = 1 << 1;
        /// Compute stage
        const COMPUTE = 1 << 2;
        /// Vertex and fragment
        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

bitflags! {
    /// Buffer usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Bound as a uniform buffer
        const UNIFORM = 1 << 0;
        /// Bound as a vertex buffer
        const VERTEX = 1 << 1;
        /// Bound as an index buffer
        const INDEX = 1 << 2;
        /// Source of a transfer
        const TRANSFER_SRC = 1 << 3;
        /// Destination of a transfer
        const TRANSFER_DST = 1 << 4;
    }
}

/// Buffer creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    /// Size in bytes
    pub size: u64,
    /// Usage flags
    pub usage: BufferUsage,
    /// Whether the CPU maps and writes this buffer directly
    pub host_visible: bool,
}

impl BufferDesc {
    /// Host-visible uniform buffer of `size` bytes
    pub const fn uniform(size: u64) -> Self {
        Self {
            size,
            usage: BufferUsage::UNIFORM,
            host_visible: true,
        }
    }
}

/// Descriptor types the core binds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DescriptorKind {
    /// Uniform buffer with a fixed offset
    UniformBuffer,
    /// Uniform buffer whose offset is supplied at bind time
    UniformBufferDynamic,
    /// Storage buffer
    StorageBuffer,
    /// Combined image + sampler
    CombinedImageSampler,
}

/// One binding inside a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutBinding {
    /// Binding number in the shader
    pub binding: u32,
    /// Descriptor type
    pub kind: DescriptorKind,
    /// Array size
    pub count: u32,
    /// Stages that read the binding
    pub stages: ShaderStages,
}

impl LayoutBinding {
    /// Dynamic-offset uniform buffer binding
    pub const fn dynamic_uniform(binding: u32, stages: ShaderStages) -> Self {
        Self {
            binding,
            kind: DescriptorKind::UniformBufferDynamic,
            count: 1,
            stages,
        }
    }

    /// Combined image sampler binding
    pub const fn combined_image_sampler(binding: u32, stages: ShaderStages) -> Self {
        Self {
            binding,
            kind: DescriptorKind::CombinedImageSampler,
            count: 1,
            stages,
        }
    }
}

/// Descriptor pool capacity for one descriptor kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSize {
    /// Descriptor type
    pub kind: DescriptorKind,
    /// Number of descriptors of this type
    pub count: u32,
}

/// What a descriptor write points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    /// A buffer range
    Buffer {
        /// Target buffer
        buffer: BufferHandle,
        /// Byte offset
        offset: u64,
        /// Byte range visible to the shader
        range: u64,
    },
    /// An image view and sampler
    Image {
        /// Image view
        view: ImageViewHandle,
        /// Sampler
        sampler: SamplerHandle,
    },
}

/// A single descriptor update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    /// Set being written
    pub set: DescriptorSetHandle,
    /// Binding number
    pub binding: u32,
    /// Descriptor type of the binding
    pub kind: DescriptorKind,
    /// New contents
    pub resource: DescriptorResource,
}

/// Surface / attachment formats the core knows by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    /// 8-bit BGRA, sRGB
    Bgra8Srgb,
    /// 8-bit BGRA, linear
    Bgra8Unorm,
    /// 8-bit RGBA, sRGB
    Rgba8Srgb,
    /// 8-bit RGBA, linear
    Rgba8Unorm,
    /// 16-bit float RGBA
    Rgba16Float,
    /// 32-bit float depth
    Depth32Float,
    /// 24-bit depth, 8-bit stencil
    Depth24Stencil8,
    /// Backend-native format code with no named variant
    Other(i32),
}

impl Format {
    /// Whether this is a depth format
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24Stencil8)
    }
}

/// Two-dimensional extent in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent2D {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Extent2D {
    /// New extent
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether either dimension is zero (minimized window)
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Swapchain request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    /// Requested extent; the device may clamp it
    pub extent: Extent2D,
    /// Preferred number of images
    pub preferred_image_count: u32,
    /// FIFO presentation when set
    pub vsync: bool,
}

/// What the device actually created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainInfo {
    /// Swapchain handle
    pub handle: SwapchainHandle,
    /// Color format of the images
    pub format: Format,
    /// Actual extent
    pub extent: Extent2D,
    /// Number of images (and image views)
    pub image_count: u32,
}

/// Attachment load behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadOp {
    /// Clear on load
    Clear,
    /// Keep previous contents
    Load,
    /// Contents undefined
    DontCare,
}

/// Attachment store behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreOp {
    /// Write results back
    Store,
    /// Discard results
    DontCare,
}

/// Color attachment of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorAttachmentDesc {
    /// Fixed format, or `None` to follow the swapchain format
    pub format: Option<Format>,
    /// Load behaviour
    pub load_op: LoadOp,
    /// Store behaviour
    pub store_op: StoreOp,
}

/// Depth attachment of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthAttachmentDesc {
    /// Depth format
    pub format: Format,
    /// Load behaviour
    pub load_op: LoadOp,
    /// Store behaviour
    pub store_op: StoreOp,
}

/// Single-subpass render pass layout, as produced by the asset layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderPassDesc {
    /// Color attachment presented to the swapchain
    pub color: ColorAttachmentDesc,
    /// Optional depth attachment
    pub depth: Option<DepthAttachmentDesc>,
}

impl RenderPassDesc {
    /// Clear-and-present forward pass with a 32-bit depth buffer
    pub const fn forward() -> Self {
        Self {
            color: ColorAttachmentDesc {
                format: None,
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
            },
            depth: Some(DepthAttachmentDesc {
                format: Format::Depth32Float,
                load_op: LoadOp::Clear,
                store_op: StoreOp::DontCare,
            }),
        }
    }

    /// Color format after resolving against the swapchain
    pub fn color_format(&self, swapchain_format: Format) -> Format {
        self.color.format.unwrap_or(swapchain_format)
    }
}

impl Default for RenderPassDesc {
    fn default() -> Self {
        Self::forward()
    }
}

/// Framebuffer request for one swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferDesc {
    /// Render pass the framebuffer is compatible with
    pub render_pass: RenderPassHandle,
    /// Swapchain that owns the color image
    pub swapchain: SwapchainHandle,
    /// Index of the swapchain image
    pub image_index: u32,
    /// Framebuffer extent
    pub extent: Extent2D,
    /// Depth attachment format, if the pass has one
    pub depth_format: Option<Format>,
}

/// Pipeline layout request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineLayoutDesc {
    /// Descriptor set layouts in set order
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    /// Push constant block size in bytes (0 for none)
    pub push_constant_size: u32,
    /// Stages that read the push constants
    pub push_constant_stages: ShaderStages,
}

/// Vertex attribute component format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexFormat {
    /// One f32
    Float,
    /// Two f32
    Vec2,
    /// Three f32
    Vec3,
    /// Four f32
    Vec4,
    /// One u32
    UInt,
}

/// Vertex buffer binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexBinding {
    /// Binding index
    pub binding: u32,
    /// Stride in bytes
    pub stride: u32,
    /// Advance per instance instead of per vertex
    pub per_instance: bool,
}

/// Vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexAttribute {
    /// Shader location
    pub location: u32,
    /// Source binding
    pub binding: u32,
    /// Component format
    pub format: VertexFormat,
    /// Byte offset inside the vertex
    pub offset: u32,
}

/// Face culling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    Back,
}

/// Graphics pipeline description
///
/// Shader code arrives as already-compiled SPIR-V words; the core never
/// compiles or reflects shaders.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsPipelineDesc {
    /// Debug name
    pub name: String,
    /// Vertex shader SPIR-V
    pub vertex_spirv: Arc<[u32]>,
    /// Fragment shader SPIR-V
    pub fragment_spirv: Arc<[u32]>,
    /// Vertex buffer bindings
    pub vertex_bindings: Vec<VertexBinding>,
    /// Vertex attributes
    pub vertex_attributes: Vec<VertexAttribute>,
    /// Descriptor set layouts in set order
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    /// Push constant block size (0 for none)
    pub push_constant_size: u32,
    /// Face culling
    pub cull_mode: CullMode,
    /// Depth test + write
    pub depth_test: bool,
    /// Alpha blending on the color attachment
    pub blend: bool,
}

impl GraphicsPipelineDesc {
    /// Pipeline layout this pipeline needs
    pub fn layout_desc(&self) -> PipelineLayoutDesc {
        PipelineLayoutDesc {
            set_layouts: self.set_layouts.clone(),
            push_constant_size: self.push_constant_size,
            push_constant_stages: ShaderStages::ALL_GRAPHICS,
        }
    }
}

/// Device limits the pools care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Required alignment of dynamic uniform offsets
    pub min_uniform_buffer_offset_alignment: u64,
    /// Largest uniform range a single descriptor may cover
    pub max_uniform_buffer_range: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            max_uniform_buffer_range: 65536,
        }
    }
}
