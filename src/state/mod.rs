//! The simulated GL state: pure data, no I/O.

pub mod objects;

use fxhash::FxHashMap;

use crate::command::{GlEnum, ObjectId};
use crate::memory::MemoryPool;
use objects::{PrivateObjects, SharedObjects};

/// Parsed `major.minor[.revision][ vendor-info]` version, used for both
/// the capture's reported context version and a target device descriptor.
///
/// Grounded on `gfx-backend-gl`'s `info::Version::parse`: a bare integer is
/// rejected, and any text after the second `.`-separated component is
/// captured as free-form vendor info rather than causing a parse error.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub vendor_info: String,
}

impl Version {
    pub fn new(major: u32, minor: u32) -> Self {
        Version {
            major,
            minor,
            vendor_info: String::new(),
        }
    }

    pub fn parse(src: &str) -> Result<Version, &str> {
        let (version, vendor_info) = match src.find(' ') {
            Some(i) => (&src[..i], &src[i + 1..]),
            None => (src, ""),
        };
        let mut it = version.split('.');
        let major = it.next().and_then(|s| s.parse().ok());
        let minor = it.next().and_then(|s| s.parse().ok());
        match (major, minor) {
            (Some(major), Some(minor)) => Ok(Version {
                major,
                minor,
                vendor_info: vendor_info.to_string(),
            }),
            _ => Err(src),
        }
    }
}

/// Per-context constants: reported version, vendor, extension list.
#[derive(Clone, Debug)]
pub struct Constants {
    pub is_es: bool,
    pub version: Version,
    pub vendor: String,
    pub extensions: Vec<String>,
}

impl Constants {
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }
}

/// Initialization and backbuffer format state, set by `EglMakeCurrent`'s
/// `DynamicContextState` extra.
#[derive(Clone, Debug, Default)]
pub struct Info {
    pub initialized: bool,
    pub backbuffer_width: u32,
    pub backbuffer_height: u32,
    pub backbuffer_has_depth_stencil: bool,
}

/// Current binding points for a context.
#[derive(Clone, Debug, Default)]
pub struct Bound {
    pub array_buffer: ObjectId,
    pub element_array_buffer: ObjectId,
    pub copy_write_buffer: ObjectId,
    pub uniform_buffer: ObjectId,
    pub draw_framebuffer: ObjectId,
    pub read_framebuffer: ObjectId,
    pub vertex_array: ObjectId,
    pub program: ObjectId,
    pub active_texture_unit: u32,
    /// `(unit, target) -> texture`.
    pub texture_units: FxHashMap<(u32, GlEnum), ObjectId>,
    /// `glBindBufferRange(GL_UNIFORM_BUFFER, index, ...)` bindings, keyed
    /// by binding index. Consulted by the compatibility transformer's
    /// uniform-buffer-alignment rewrite.
    pub uniform_buffer_bindings: FxHashMap<u32, UniformBufferBinding>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformBufferBinding {
    pub buffer: ObjectId,
    pub offset: i64,
    pub size: i64,
}

#[derive(Clone, Debug)]
pub struct PixelStorage {
    pub pack_alignment: i32,
    pub unpack_alignment: i32,
}

impl Default for PixelStorage {
    fn default() -> Self {
        PixelStorage {
            pack_alignment: 4,
            unpack_alignment: 4,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Scissor {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Clone, Debug, Default)]
pub struct FragmentOperations {
    pub framebuffer_srgb: bool,
    pub scissor: Option<Scissor>,
}

/// Object tables, split into shared (within a context-share-group) and
/// private.
#[derive(Default, Clone)]
pub struct Objects {
    pub shared: SharedObjects,
    pub private: PrivateObjects,
}

/// Per-GL-context state.
#[derive(Clone)]
pub struct Context {
    pub constants: Constants,
    pub info: Info,
    pub bound: Bound,
    pub pixel_storage: PixelStorage,
    pub fragment_operations: FragmentOperations,
    pub objects: Objects,
}

impl Context {
    pub fn new(constants: Constants) -> Self {
        Context {
            constants,
            info: Info::default(),
            bound: Bound::default(),
            pixel_storage: PixelStorage::default(),
            fragment_operations: FragmentOperations::default(),
            objects: Objects::default(),
        }
    }

    /// Currently bound texture for `unit`/`target`.
    pub fn bound_texture_for_unit(&self, unit: u32, target: GlEnum) -> ObjectId {
        self.bound
            .texture_units
            .get(&(unit, target))
            .copied()
            .unwrap_or(0)
    }
}

/// A per-capture `State`: a memory pool, a `thread -> context` map, and the
/// current thread.
#[derive(Default, Clone)]
pub struct State {
    pub memory: MemoryPool,
    pub contexts: FxHashMap<ObjectId, Context>,
    pub threads: FxHashMap<u64, ObjectId>,
    pub current_thread: u64,
}

impl State {
    pub fn new() -> Self {
        State::default()
    }

    /// `GetContext(state)` — the current thread's context, if any.
    pub fn current_context(&self) -> Option<&Context> {
        self.threads
            .get(&self.current_thread)
            .and_then(|ctx_id| self.contexts.get(ctx_id))
    }

    pub fn current_context_mut(&mut self) -> Option<&mut Context> {
        let ctx_id = *self.threads.get(&self.current_thread)?;
        self.contexts.get_mut(&ctx_id)
    }

    pub fn current_context_id(&self) -> Option<ObjectId> {
        self.threads.get(&self.current_thread).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parse_matches_lenient_grammar() {
        assert_eq!(Version::parse("1"), Err("1"));
        assert_eq!(Version::parse("1."), Err("1."));
        assert_eq!(Version::parse("3.0"), Ok(Version::new(3, 0)));
        assert_eq!(
            Version::parse("3.0 NVIDIA"),
            Ok(Version {
                major: 3,
                minor: 0,
                vendor_info: "NVIDIA".into()
            })
        );
    }

    #[test]
    fn object_id_zero_is_never_in_tables() {
        // The invariant is enforced by callers (remap/compat), but the
        // tables themselves allow any key; this test documents the
        // convention relied on elsewhere.
        let objs = Objects::default();
        assert!(!objs.shared.buffers.contains_key(&0));
    }
}
