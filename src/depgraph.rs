//! Dependency graph builder: per-command reads/modifies/writes over
//! hierarchical state keys.

use fxhash::FxHashMap;

use crate::command::{Command, ObjectId};
use crate::state::State;

/// A logical piece of GL state. Each key has a `parent()`, forming a tree
/// rooted at `StateKey::Root`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum StateKey {
    Root,
    UniformGroup { program: ObjectId },
    Uniform { program: ObjectId, location: i32, count: u32 },
    VertexAttribGroup { vertex_array: ObjectId },
    VertexAttrib { vertex_array: ObjectId, location: u32 },
    RenderbufferData { renderbuffer: ObjectId },
    RenderbufferSubData { renderbuffer: ObjectId, rect: (i32, i32, i32, i32) },
    TextureData { texture: ObjectId },
    TextureSize { texture: ObjectId },
    EglImageData { handle: u64 },
    EglImageSize { handle: u64 },
}

impl StateKey {
    pub fn parent(&self) -> StateKey {
        match self {
            StateKey::Root => StateKey::Root,
            StateKey::UniformGroup { .. } => StateKey::Root,
            StateKey::Uniform { program, .. } => StateKey::UniformGroup { program: *program },
            StateKey::VertexAttribGroup { .. } => StateKey::Root,
            StateKey::VertexAttrib { vertex_array, .. } => {
                StateKey::VertexAttribGroup { vertex_array: *vertex_array }
            }
            StateKey::RenderbufferData { .. } => StateKey::Root,
            StateKey::RenderbufferSubData { renderbuffer, .. } => {
                StateKey::RenderbufferData { renderbuffer: *renderbuffer }
            }
            StateKey::TextureData { .. } => StateKey::Root,
            StateKey::TextureSize { texture } => StateKey::TextureData { texture: *texture },
            StateKey::EglImageData { .. } => StateKey::Root,
            StateKey::EglImageSize { handle } => StateKey::EglImageData { handle: *handle },
        }
    }
}

/// Opaque numeric alias for a `StateKey`, interned so the hot path of
/// behaviour computation never hashes a `StateKey` directly.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct StateAddress(pub u32);

/// `address -> key` / `address -> parentAddress` mapping.
#[derive(Default)]
pub struct AddressSpace {
    keys: Vec<StateKey>,
    interned: FxHashMap<StateKey, StateAddress>,
    parents: Vec<StateAddress>,
}

impl AddressSpace {
    pub fn new() -> Self {
        let mut space = AddressSpace::default();
        let root = space.intern_uncached(StateKey::Root);
        space.parents.push(root); // root is its own parent
        space
    }

    fn intern_uncached(&mut self, key: StateKey) -> StateAddress {
        let addr = StateAddress(self.keys.len() as u32);
        self.keys.push(key.clone());
        self.interned.insert(key, addr);
        addr
    }

    /// Intern `key`, returning its stable address and ensuring its
    /// ancestors (up to the root) are interned too, so `parent_of` is
    /// always defined.
    pub fn intern(&mut self, key: StateKey) -> StateAddress {
        if let Some(addr) = self.interned.get(&key) {
            return *addr;
        }
        let parent_key = key.parent();
        let parent_addr = if parent_key == key {
            StateAddress(0)
        } else {
            self.intern(parent_key)
        };
        let addr = self.intern_uncached(key);
        if self.parents.len() <= addr.0 as usize {
            self.parents.resize(addr.0 as usize + 1, StateAddress(0));
        }
        self.parents[addr.0 as usize] = parent_addr;
        addr
    }

    pub fn key(&self, addr: StateAddress) -> &StateKey {
        &self.keys[addr.0 as usize]
    }

    pub fn parent_of(&self, addr: StateAddress) -> StateAddress {
        self.parents[addr.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Per-command effect on the dependency graph.
#[derive(Clone, Debug, Default)]
pub struct Behaviour {
    pub reads: Vec<StateAddress>,
    pub modifies: Vec<StateAddress>,
    pub writes: Vec<StateAddress>,
    /// Force-live even if no observed reader.
    pub keep_alive: bool,
    /// The command's own `mutate` failed — its writes are not credited.
    pub aborted: bool,
}

const COLOR_BUFFER_BIT: u32 = 0x4000;
const DEPTH_BUFFER_BIT: u32 = 0x0100;
const STENCIL_BUFFER_BIT: u32 = 0x0400;

/// Compute the behaviour of one command, given the state *before* it is
/// interpreted.
pub fn behaviour(
    addresses: &mut AddressSpace,
    state: &State,
    cmd: &Command,
    preserve_buffers_on_swap: bool,
) -> Behaviour {
    let mut b = Behaviour::default();
    let ctx = match state.current_context() {
        Some(ctx) => ctx,
        None => {
            b.keep_alive = true;
            return b;
        }
    };

    match cmd {
        Command::SwapBuffers => {
            // Writes the default framebuffer's renderbuffers; omits the
            // color write if `PreserveBuffersOnSwap` is set.
            if !preserve_buffers_on_swap {
                b.writes.push(addresses.intern(StateKey::RenderbufferData {
                    renderbuffer: 0,
                }));
            }
        }
        Command::DrawArrays { .. } | Command::DrawElements { .. } => {
            b.reads
                .push(addresses.intern(StateKey::UniformGroup { program: ctx.bound.program }));
            b.reads.push(addresses.intern(StateKey::VertexAttribGroup {
                vertex_array: ctx.bound.vertex_array,
            }));
            for (&(_, _target), &texture) in &ctx.bound.texture_units {
                b.reads
                    .push(addresses.intern(StateKey::TextureData { texture }));
            }
            if let Some(fb) = ctx.objects.private.framebuffers.get(&ctx.bound.draw_framebuffer) {
                for attachment in fb.color_attachments.iter().flatten() {
                    b.modifies.push(addresses.intern(attachment_data_key(attachment)));
                }
                if let Some(a) = &fb.depth_attachment {
                    b.modifies.push(addresses.intern(attachment_data_key(a)));
                }
                if let Some(a) = &fb.stencil_attachment {
                    b.modifies.push(addresses.intern(attachment_data_key(a)));
                }
            }
        }
        Command::Clear { mask } => {
            if let Some(fb) = ctx.objects.private.framebuffers.get(&ctx.bound.draw_framebuffer) {
                if mask & COLOR_BUFFER_BIT != 0 {
                    for attachment in fb.color_attachments.iter().flatten() {
                        b.reads.push(addresses.intern(attachment_size_key(attachment)));
                        b.writes.push(addresses.intern(attachment_data_key(attachment)));
                    }
                }
                if mask & DEPTH_BUFFER_BIT != 0 {
                    if let Some(a) = &fb.depth_attachment {
                        b.reads.push(addresses.intern(attachment_size_key(a)));
                        b.writes.push(addresses.intern(attachment_data_key(a)));
                    }
                }
                if mask & STENCIL_BUFFER_BIT != 0 {
                    if let Some(a) = &fb.stencil_attachment {
                        b.reads.push(addresses.intern(attachment_size_key(a)));
                        b.writes.push(addresses.intern(attachment_data_key(a)));
                    }
                }
            }
        }
        Command::TexImage2D { target, .. } | Command::TexImage3D { target, .. } => {
            let unit = ctx.bound.active_texture_unit;
            let texture = ctx.bound_texture_for_unit(unit, *target);
            b.modifies
                .push(addresses.intern(StateKey::TextureData { texture }));
            // A resize discards previous content: this is a write of size.
            b.writes
                .push(addresses.intern(StateKey::TextureSize { texture }));
        }
        Command::TexSubImage2D { target, .. }
        | Command::TexSubImage3D { target, .. }
        | Command::CompressedTexSubImage2D { target, .. } => {
            let unit = ctx.bound.active_texture_unit;
            let texture = ctx.bound_texture_for_unit(unit, *target);
            b.modifies
                .push(addresses.intern(StateKey::TextureData { texture }));
        }
        Command::CompressedTexImage2D { target, .. } => {
            let unit = ctx.bound.active_texture_unit;
            let texture = ctx.bound_texture_for_unit(unit, *target);
            b.modifies
                .push(addresses.intern(StateKey::TextureData { texture }));
            b.writes
                .push(addresses.intern(StateKey::TextureSize { texture }));
        }
        Command::Uniform4fv {
            location, count, ..
        } => {
            // Arrays and scalars are intentionally separated to avoid
            // false-aliasing.
            b.writes.push(addresses.intern(StateKey::Uniform {
                program: ctx.bound.program,
                location: *location,
                count: *count,
            }));
        }
        Command::VertexAttribPointer { location, .. } => {
            b.writes.push(addresses.intern(StateKey::VertexAttrib {
                vertex_array: ctx.bound.vertex_array,
                location: *location,
            }));
        }
        Command::BindFramebuffer { .. } | Command::BindTexture { .. } => {
            // May act as EGL image resolve/load points.
            b.keep_alive = true;
        }
        Command::Other { .. } => {
            b.keep_alive = true;
        }
        _ => {}
    }
    b
}

pub(crate) fn attachment_data_key(a: &crate::state::objects::Attachment) -> StateKey {
    use crate::state::objects::AttachmentSource::*;
    match a.source {
        Texture { texture, .. } => StateKey::TextureData { texture },
        Renderbuffer(rb) => StateKey::RenderbufferData { renderbuffer: rb },
    }
}

fn attachment_size_key(a: &crate::state::objects::Attachment) -> StateKey {
    use crate::state::objects::AttachmentSource::*;
    match a.source {
        Texture { texture, .. } => StateKey::TextureSize { texture },
        Renderbuffer(rb) => StateKey::RenderbufferData { renderbuffer: rb },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_array_and_scalar_writes_do_not_alias() {
        let mut addrs = AddressSpace::new();
        let array = addrs.intern(StateKey::Uniform {
            program: 1,
            location: 0,
            count: 10,
        });
        let scalar = addrs.intern(StateKey::Uniform {
            program: 1,
            location: 0,
            count: 1,
        });
        assert_ne!(array, scalar);
    }

    #[test]
    fn parent_chain_reaches_root() {
        let mut addrs = AddressSpace::new();
        let attrib = addrs.intern(StateKey::VertexAttrib {
            vertex_array: 3,
            location: 0,
        });
        let group = addrs.parent_of(attrib);
        assert_eq!(
            *addrs.key(group),
            StateKey::VertexAttribGroup { vertex_array: 3 }
        );
        let root = addrs.parent_of(group);
        assert_eq!(*addrs.key(root), StateKey::Root);
    }

    #[test]
    fn interning_the_same_key_twice_returns_the_same_address() {
        let mut addrs = AddressSpace::new();
        let a = addrs.intern(StateKey::TextureData { texture: 5 });
        let b = addrs.intern(StateKey::TextureData { texture: 5 });
        assert_eq!(a, b);
    }

}
