//! Object entities stored in the per-context shared/private tables.

use arrayvec::ArrayVec;
use fxhash::FxHashMap;

use crate::command::{AttributeInfo, GlEnum, ObjectId, UniformInfo};

/// Desktop GL and GLES3 both guarantee at least this many color
/// attachments; a fixed-capacity table avoids a heap allocation per
/// framebuffer for what is, in practice, always a handful of entries.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

#[derive(Clone, Debug, Default)]
pub struct Buffer {
    /// The target it was last bound to; `remap::value` consults this to
    /// decide whether a pointer parameter is a buffer offset or a client
    /// pointer.
    pub last_target: Option<GlEnum>,
    pub size: i64,
    pub data: Vec<u8>,
    pub mapped: bool,
    /// Set on buffers synthesized by the compatibility transformer (e.g.
    /// client-array upload targets, UBO alignment scratch buffers) so the
    /// dependency graph and issue finder can tell them apart from capture
    /// buffers if needed.
    pub synthetic: bool,
}

#[derive(Clone, Debug)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub data_format: GlEnum,
    pub data_type: GlEnum,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct TextureLevel {
    pub layers: Vec<Image>,
}

#[derive(Clone, Debug, Default)]
pub struct Texture {
    pub target: Option<GlEnum>,
    pub levels: Vec<TextureLevel>,
    /// Swizzle override the compatibility layer applies to emulate
    /// luminance/alpha formats on core profiles.
    pub swizzle: Option<[GlEnum; 4]>,
    /// Present when this texture is backed by an `EGLImage`.
    pub egl_image: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Clone, Debug)]
pub struct Shader {
    pub stage: ShaderStage,
    pub source: String,
    pub compiled: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Program {
    pub shaders: Vec<ObjectId>,
    pub linked: bool,
    pub active_uniforms: Vec<UniformInfo>,
    pub active_attributes: Vec<AttributeInfo>,
    pub uniform_locations: FxHashMap<String, i32>,
}

#[derive(Clone, Debug, Default)]
pub struct Sampler;

#[derive(Clone, Debug, Default)]
pub struct Sync;

/// Where a vertex attribute's data comes from: a GL buffer offset, or a
/// client pointer captured in memory observations.
#[derive(Clone, Debug, PartialEq)]
pub enum AttribSource {
    Buffer { buffer: ObjectId, offset: i64 },
    Client { observed: crate::memory::MemoryRange },
}

#[derive(Clone, Debug)]
pub struct VertexAttributeArray {
    pub enabled: bool,
    pub size: i32,
    pub gl_type: GlEnum,
    pub normalized: bool,
    pub stride: i32,
    pub source: Option<AttribSource>,
    /// Last value set via `glVertexAttrib4fv`, used for the redundant-call
    /// elimination rule. Any `NaN` component makes the
    /// comparison against a new value always "not equal".
    pub last_constant_value: Option<[f32; 4]>,
}

impl Default for VertexAttributeArray {
    fn default() -> Self {
        VertexAttributeArray {
            enabled: false,
            size: 4,
            gl_type: 0,
            normalized: false,
            stride: 0,
            source: None,
            last_constant_value: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct VertexArray {
    pub attributes: FxHashMap<u32, VertexAttributeArray>,
    pub element_array_buffer: ObjectId,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AttachmentSource {
    Texture { texture: ObjectId, level: i32 },
    Renderbuffer(ObjectId),
}

#[derive(Clone, Debug)]
pub struct Attachment {
    pub source: AttachmentSource,
}

#[derive(Clone, Debug, Default)]
pub struct Framebuffer {
    pub color_attachments: ArrayVec<[Option<Attachment>; MAX_COLOR_ATTACHMENTS]>,
    pub depth_attachment: Option<Attachment>,
    pub stencil_attachment: Option<Attachment>,
    /// Flips true on any draw call bound to this framebuffer and false
    /// once an EGL-image-backed attachment has been resolved.
    pub egl_image_dirty: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Renderbuffer {
    pub width: u32,
    pub height: u32,
    pub internal_format: GlEnum,
    pub samples: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct TransformFeedback;
#[derive(Clone, Debug, Default)]
pub struct Pipeline;
#[derive(Clone, Debug, Default)]
pub struct Query;

/// Object tables shared within a context-share-group.
#[derive(Default, Clone)]
pub struct SharedObjects {
    pub buffers: FxHashMap<ObjectId, Buffer>,
    pub textures: FxHashMap<ObjectId, Texture>,
    pub renderbuffers: FxHashMap<ObjectId, Renderbuffer>,
    pub programs: FxHashMap<ObjectId, Program>,
    pub shaders: FxHashMap<ObjectId, Shader>,
    pub samplers: FxHashMap<ObjectId, Sampler>,
    pub syncs: FxHashMap<ObjectId, Sync>,
}

/// Object tables private to a single context.
#[derive(Default, Clone)]
pub struct PrivateObjects {
    pub vertex_arrays: FxHashMap<ObjectId, VertexArray>,
    pub framebuffers: FxHashMap<ObjectId, Framebuffer>,
    pub transform_feedbacks: FxHashMap<ObjectId, TransformFeedback>,
    pub pipelines: FxHashMap<ObjectId, Pipeline>,
    pub queries: FxHashMap<ObjectId, Query>,
}
