//! The command (atom) model: one tagged-union variant per modeled GL/EGL
//! call, plus the observations/extras/flags every command carries.
//!
//! The full GL entry-point surface runs into the hundreds of calls; the
//! per-variant record generator is an external collaborator. What's
//! modeled here is exactly the set the compatibility transformer,
//! dependency graph and the literal test scenarios name. Anything else
//! round-trips through `Other`.

use bitflags::bitflags;

use crate::memory::{MemoryRange, Observations};

pub type ObjectId = u32;
pub type GlEnum = u32;
pub type GlBitfield = u32;

bitflags! {
    #[derive(Default)]
    pub struct CommandFlags: u32 {
        /// Set for commands that perform a draw.
        const DRAW_CALL = 0b0000_0001;
        /// Hint from the schema generator that this command should be
        /// treated as `keepAlive` regardless of graph analysis.
        const KEEP_ALIVE_HINT = 0b0000_0010;
    }
}

/// Either a replay-space absolute pointer/buffer-offset, or a reference
/// into the capture's observed memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pointer {
    /// Already translated to replay space: a GL buffer offset, a sync
    /// object, an EGL image handle.
    Absolute(u64),
    /// Client memory, to be looked up in the observations map.
    Observed(MemoryRange),
}

/// A pointer parameter as recorded at capture time, before `remap::value`
/// has decided whether it's `Absolute` or `Observed` for this call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapturePointer {
    pub address: u64,
}

/// Out-of-band records carried alongside a command.
#[derive(Clone, Debug, PartialEq)]
pub enum Extra {
    /// Forces the context's reported GL version, used by the compatibility
    /// transformer's context-boot rewrite.
    StaticContextState { major: u32, minor: u32 },
    /// Backbuffer format description captured with `EglMakeCurrent`.
    DynamicContextState {
        backbuffer_width: u32,
        backbuffer_height: u32,
        has_depth_stencil: bool,
    },
    /// Active uniforms/attributes as queried at trace time, used to seed
    /// per-element uniform locations after link and to
    /// rebuild stubbed programs from `glProgramBinary`.
    ProgramInfo {
        active_uniforms: Vec<UniformInfo>,
        active_attributes: Vec<AttributeInfo>,
    },
    /// The GL error recorded at trace time, consulted by the issue finder.
    ErrorState { error: GlEnum },
}

#[derive(Clone, Debug, PartialEq)]
pub struct UniformInfo {
    pub name: String,
    pub location: i32,
    pub array_size: u32,
    pub gl_type: GlEnum,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AttributeInfo {
    pub name: String,
    pub location: i32,
    pub gl_type: GlEnum,
}

/// One recorded API call, its parameters, and everything it carries.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    EglCreateContext {
        context: ObjectId,
        share_context: ObjectId,
    },
    EglMakeCurrent {
        context: ObjectId,
        extras: Vec<Extra>,
    },
    EglDestroyContext {
        context: ObjectId,
    },
    SwapBuffers,

    GenBuffers(Vec<ObjectId>),
    GenTextures(Vec<ObjectId>),
    GenVertexArrays(Vec<ObjectId>),
    GenFramebuffers(Vec<ObjectId>),
    DeleteBuffers(Vec<ObjectId>),
    DeleteTextures(Vec<ObjectId>),

    BindBuffer {
        target: GlEnum,
        buffer: ObjectId,
    },
    BindBufferRange {
        target: GlEnum,
        index: u32,
        buffer: ObjectId,
        offset: i64,
        size: i64,
    },
    BufferData {
        target: GlEnum,
        size: i64,
        data: Option<CapturePointer>,
        usage: GlEnum,
    },
    CopyBufferSubData {
        read_target: GlEnum,
        write_target: GlEnum,
        read_offset: i64,
        write_offset: i64,
        size: i64,
    },
    MapBufferRange {
        target: GlEnum,
        offset: i64,
        size: i64,
        access: GlBitfield,
        suffix_oes: bool,
    },
    UnmapBuffer {
        target: GlEnum,
        suffix_oes: bool,
    },
    FlushMappedBufferRange {
        target: GlEnum,
        offset: i64,
        size: i64,
        suffix_ext: bool,
    },

    BindVertexArray {
        array: ObjectId,
        suffix_oes: bool,
    },
    EnableVertexAttribArray(u32),
    DisableVertexAttribArray(u32),
    VertexAttribPointer {
        location: u32,
        size: i32,
        gl_type: GlEnum,
        normalized: bool,
        stride: i32,
        pointer: CapturePointer,
    },
    VertexAttrib4fv {
        location: u32,
        value: [f32; 4],
    },

    BindTexture {
        target: GlEnum,
        texture: ObjectId,
    },
    TexParameter {
        target: GlEnum,
        pname: GlEnum,
        value: i32,
    },
    TexImage2D {
        target: GlEnum,
        level: i32,
        internal_format: GlEnum,
        width: i32,
        height: i32,
        format: GlEnum,
        gl_type: GlEnum,
        data: Option<CapturePointer>,
    },
    TexSubImage2D {
        target: GlEnum,
        level: i32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: GlEnum,
        gl_type: GlEnum,
        data: Option<CapturePointer>,
    },
    TexImage3D {
        target: GlEnum,
        level: i32,
        internal_format: GlEnum,
        width: i32,
        height: i32,
        depth: i32,
        format: GlEnum,
        gl_type: GlEnum,
        data: Option<CapturePointer>,
        suffix_oes: bool,
    },
    TexSubImage3D {
        target: GlEnum,
        level: i32,
        suffix_oes: bool,
    },
    TexStorage2D {
        target: GlEnum,
        levels: i32,
        internal_format: GlEnum,
        width: i32,
        height: i32,
        suffix: TexStorageSuffix,
    },
    CompressedTexImage2D {
        target: GlEnum,
        level: i32,
        internal_format: GlEnum,
        width: i32,
        height: i32,
        data: CapturePointer,
        image_size: i32,
    },
    CompressedTexSubImage2D {
        target: GlEnum,
        level: i32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: GlEnum,
        data: CapturePointer,
        image_size: i32,
    },
    CopyTexImage2D {
        target: GlEnum,
        level: i32,
        internal_format: GlEnum,
        width: i32,
        height: i32,
    },
    EglImageTargetTexture2DOES {
        target: GlEnum,
        image: u64,
    },
    RenderbufferStorageMultisampleEXT {
        samples: i32,
        internal_format: GlEnum,
        width: i32,
        height: i32,
    },
    FramebufferTexture2DMultisampleEXT {
        target: GlEnum,
        attachment: GlEnum,
        tex_target: GlEnum,
        texture: ObjectId,
        level: i32,
        samples: i32,
    },
    StartTilingQCOM,
    EndTilingQCOM,

    BindFramebuffer {
        target: GlEnum,
        framebuffer: ObjectId,
    },
    ReadPixels {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: GlEnum,
        gl_type: GlEnum,
    },
    Clear {
        mask: GlBitfield,
    },
    Enable(GlEnum),
    Disable(GlEnum),

    ShaderSource {
        shader: ObjectId,
        source: String,
    },
    CompileShader(ObjectId),
    AttachShader {
        program: ObjectId,
        shader: ObjectId,
    },
    LinkProgram {
        program: ObjectId,
        extras: Vec<Extra>,
    },
    UseProgram(ObjectId),
    GetUniformLocation {
        program: ObjectId,
        name: String,
    },
    Uniform4fv {
        location: i32,
        count: u32,
        value: Vec<[f32; 4]>,
    },
    ProgramBinary {
        program: ObjectId,
        binary_format: GlEnum,
        data: CapturePointer,
        length: i32,
        extras: Vec<Extra>,
        suffix_oes: bool,
    },

    DrawArrays {
        mode: GlEnum,
        first: i32,
        count: i32,
    },
    DrawElements {
        mode: GlEnum,
        count: i32,
        index_type: GlEnum,
        indices: CapturePointer,
    },

    /// Debug markers, labels, callback registration, resource-status
    /// queries: silenced as no-ops by the compatibility transformer.
    DebugMarker {
        text: String,
    },
    GetError,
    GenericGet {
        pname: GlEnum,
    },

    /// Anything outside the modeled taxonomy. Forwarded unchanged by every
    /// transformer; gets `keepAlive = true` in the dependency graph.
    Other {
        name: &'static str,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TexStorageSuffix {
    None,
    Ext,
    Oes,
}

impl Command {
    pub fn flags(&self) -> CommandFlags {
        match self {
            Command::DrawArrays { .. } | Command::DrawElements { .. } => CommandFlags::DRAW_CALL,
            Command::Other { .. } => CommandFlags::KEEP_ALIVE_HINT,
            _ => CommandFlags::empty(),
        }
    }

    pub fn is_draw_call(&self) -> bool {
        self.flags().contains(CommandFlags::DRAW_CALL)
    }
}

/// A command together with the observations that must be applied before it
/// is interpreted.
#[derive(Clone, Debug)]
pub struct Atom {
    pub id: crate::id::CommandId,
    pub command: Command,
    pub observations: Observations,
}

impl Atom {
    pub fn new(id: crate::id::CommandId, command: Command) -> Self {
        Atom {
            id,
            command,
            observations: Observations::none(),
        }
    }

    pub fn with_observations(mut self, observations: Observations) -> Self {
        self.observations = observations;
        self
    }
}

impl From<(crate::id::CommandId, Command)> for Atom {
    fn from((id, command): (crate::id::CommandId, Command)) -> Self {
        Atom::new(id, command)
    }
}
