//! ID remapping and pointer valuation at backend emit.

use crate::command::{Command, GlEnum, ObjectId, Pointer};
use crate::state::objects::AttribSource;
use crate::state::{Context, State};

/// A compound key that uniquely identifies an object across command
/// reordering: typically `(table, id)` for context-private objects, or
/// `(program, id)` for objects scoped to a program (uniform locations,
/// uniform blocks).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RemapKey {
    Table { table: ObjectTable, context: ObjectId, id: ObjectId },
    ProgramScoped { program: ObjectId, id: i32 },
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ObjectTable {
    Buffer,
    Texture,
    Renderbuffer,
    Program,
    Shader,
    Sampler,
    Sync,
    VertexArray,
    Framebuffer,
    TransformFeedback,
    Pipeline,
    Query,
}

/// `remap(id, cmd, state) -> (key, should_remap)`. Id 0
/// always returns `should_remap = false` — it aliases the default/unbound
/// object and is never a valid object.
pub fn remap(
    table: ObjectTable,
    context: ObjectId,
    id: ObjectId,
) -> (RemapKey, bool) {
    let should_remap = id != 0;
    (
        RemapKey::Table {
            table,
            context,
            id,
        },
        should_remap,
    )
}

/// A uniform location or uniform block index scoped to a program.
pub fn remap_program_scoped(program: ObjectId, id: i32) -> (RemapKey, bool) {
    (RemapKey::ProgramScoped { program, id }, id >= 0)
}

/// `value(pointer, cmd, state) -> AbsoluteOrObservedPointer`. For buffer-targeted pointer parameters: if the relevant
/// buffer-binding target is non-zero, the pointer is a byte offset into
/// that GL buffer (`Absolute`); otherwise it is client memory (`Observed`).
pub fn value_for_vertex_attrib(
    ctx: &Context,
    address: u64,
    size_hint: u64,
) -> Pointer {
    if ctx.bound.array_buffer != 0 {
        Pointer::Absolute(address)
    } else {
        Pointer::Observed(crate::memory::MemoryRange {
            pool: crate::memory::PoolId::Application,
            base: address,
            size: size_hint,
        })
    }
}

pub fn value_for_element_indices(ctx: &Context, address: u64, size_hint: u64) -> Pointer {
    if ctx.bound.element_array_buffer != 0 {
        Pointer::Absolute(address)
    } else {
        Pointer::Observed(crate::memory::MemoryRange {
            pool: crate::memory::PoolId::Application,
            base: address,
            size: size_hint,
        })
    }
}

/// Sync objects and EGL images are always replay-space handles, never
/// observed client memory.
pub fn value_for_handle(handle: u64) -> Pointer {
    Pointer::Absolute(handle)
}

/// Resolve a vertex attribute's recorded source back to a `Pointer`, for
/// code that only has the simulated `VertexArray` state to go on (used by
/// the dependency graph and the client-array compaction pass).
pub fn attrib_pointer(source: &AttribSource) -> Pointer {
    match source {
        AttribSource::Buffer { offset, .. } => Pointer::Absolute(*offset as u64),
        AttribSource::Client { observed } => Pointer::Observed(*observed),
    }
}

/// High-range id allocator for objects synthesized by the compatibility
/// transformer.
pub struct HighIdAllocator {
    next: ObjectId,
}

impl Default for HighIdAllocator {
    fn default() -> Self {
        HighIdAllocator { next: 0xFFFF_0000 }
    }
}

impl HighIdAllocator {
    pub fn alloc(&mut self) -> ObjectId {
        let id = self.next;
        self.next = self.next.wrapping_sub(1);
        id
    }
}

/// Resolve the GL target parameter a command's bound-texture-unit query
/// depends on (`subGetTextureTargetFromSamplerType` analogue), falling
/// back to `GL_TEXTURE_2D` when the command carries no target of its own.
pub fn texture_target_for(cmd: &Command) -> Option<GlEnum> {
    match cmd {
        Command::BindTexture { target, .. }
        | Command::TexParameter { target, .. }
        | Command::TexImage2D { target, .. }
        | Command::TexSubImage2D { target, .. }
        | Command::TexStorage2D { target, .. }
        | Command::CompressedTexImage2D { target, .. }
        | Command::CompressedTexSubImage2D { target, .. }
        | Command::CopyTexImage2D { target, .. }
        | Command::EglImageTargetTexture2DOES { target, .. } => Some(*target),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_zero_never_remaps() {
        let (_, should) = remap(ObjectTable::Buffer, 1, 0);
        assert!(!should);
        let (_, should) = remap(ObjectTable::Buffer, 1, 7);
        assert!(should);
    }

    #[test]
    fn high_id_allocator_descends_and_never_reaches_capture_range() {
        let mut alloc = HighIdAllocator::default();
        let a = alloc.alloc();
        let b = alloc.alloc();
        assert!(a >= 0xFFFF_0000);
        assert!(b < a);
    }
}
