//! External collaborators: the shader translator, texture
//! decompressor and replay builder. Modeled as traits so the core is
//! testable without a full backend, the same boundary `gfx-hal` draws
//! between its portable crate and a concrete GL/Vulkan/Metal backend.

use crate::command::Command;
use crate::error::Result;
use crate::memory::MemoryRange;
use crate::state::objects::ShaderStage;
use crate::state::Version;

/// `translate(source, language, extensions, targetVersion)`.
///
/// Must preserve externally observable semantics: rename identifiers that
/// collide with new builtins (a user `texture` identifier once `texture()`
/// becomes a builtin), translate `attribute`/`varying` to `in`/`out`, emit
/// `layout(location=i) out vec4 FragDatai` for `gl_FragData[i]`, and
/// substitute `samplerExternalOES` with `sampler2D`.
pub trait ShaderTranslator {
    fn translate(
        &self,
        source: &str,
        stage: ShaderStage,
        extensions: &[String],
        target_version: &Version,
    ) -> Result<String>;
}

/// `decompress(internalformat, width, height, compressed_bytes)`.
pub trait TextureDecompressor {
    fn decompress(
        &self,
        internal_format: u32,
        width: u32,
        height: u32,
        compressed: &[u8],
    ) -> Result<(Vec<u8>, (u32, u32))>;
}

/// A postback continuation: invoked when the backend flushes replay
/// telemetry to the host.
pub type PostbackCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Where a postback's source bytes come from.
#[derive(Clone, Copy, Debug)]
pub enum PostbackSource {
    Absolute(u64),
    Observed(MemoryRange),
}

/// A handle into replay-side storage allocated through the builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// The replay-side emitter: `Push/Store/Call/Post/Buffer/AllocateTemporaryMemory/ReserveMemory`.
pub trait ReplayBuilder {
    /// Records that `cmd` is about to be interpreted (before `Mutate`
    /// touches simulated state).
    fn push(&mut self, cmd: &Command);
    /// Copies `bytes` into replay-side storage, returning a handle.
    fn store(&mut self, bytes: &[u8]) -> BufferHandle;
    /// Emits the backend call for `cmd` (after `Mutate` has run).
    fn call(&mut self, cmd: &Command);
    /// Registers a postback continuation, run when the backend next
    /// flushes. Implementations must bound their pending
    /// queue.
    fn post(&mut self, source: PostbackSource, size: usize, callback: PostbackCallback);
    fn allocate_temporary_memory(&mut self, size: usize) -> BufferHandle;
    fn reserve_memory(&mut self, size: usize) -> BufferHandle;
}

/// Upper bound on pending postback continuations. Exceeding
/// it is logged and the oldest continuation is dropped rather than left to
/// grow without bound while a driver stalls.
pub const MAX_PENDING_POSTBACKS: usize = 64;

/// Lightweight implementations of the collaborator traits above, for
/// exercising transformers without a real GLSL compiler, texture codec or
/// GL driver behind them. Not `cfg(test)`-gated: both this crate's own
/// unit tests and the integration tests under `tests/` link against it.
pub mod doubles {
    use super::*;

    /// A `ReplayBuilder` that records calls without doing anything with
    /// them, for unit-testing transformers in isolation.
    #[derive(Default)]
    pub struct NullReplayBuilder {
        pub pushed: Vec<Command>,
        pub called: Vec<Command>,
        pub pending_postbacks: std::collections::VecDeque<(PostbackSource, usize)>,
        next_handle: u64,
    }

    impl ReplayBuilder for NullReplayBuilder {
        fn push(&mut self, cmd: &Command) {
            self.pushed.push(cmd.clone());
        }

        fn store(&mut self, _bytes: &[u8]) -> BufferHandle {
            self.next_handle += 1;
            BufferHandle(self.next_handle)
        }

        fn call(&mut self, cmd: &Command) {
            self.called.push(cmd.clone());
        }

        fn post(&mut self, source: PostbackSource, size: usize, mut callback: PostbackCallback) {
            if self.pending_postbacks.len() >= MAX_PENDING_POSTBACKS {
                log::warn!("postback queue full, dropping oldest continuation");
                self.pending_postbacks.pop_front();
            }
            self.pending_postbacks.push_back((source, size));
            callback(&[]);
        }

        fn allocate_temporary_memory(&mut self, size: usize) -> BufferHandle {
            self.reserve_memory(size)
        }

        fn reserve_memory(&mut self, _size: usize) -> BufferHandle {
            self.next_handle += 1;
            BufferHandle(self.next_handle)
        }
    }

    /// A translator that returns the source unchanged, for tests that
    /// don't exercise GLSL rewriting.
    pub struct EchoShaderTranslator;

    impl ShaderTranslator for EchoShaderTranslator {
        fn translate(
            &self,
            source: &str,
            _stage: ShaderStage,
            _extensions: &[String],
            _target_version: &Version,
        ) -> Result<String> {
            Ok(source.to_string())
        }
    }

    /// A decompressor that always fails, exercising the "failure is
    /// logged and the call is passed through unmodified" path.
    pub struct FailingDecompressor;

    impl TextureDecompressor for FailingDecompressor {
        fn decompress(
            &self,
            _internal_format: u32,
            _width: u32,
            _height: u32,
            _compressed: &[u8],
        ) -> Result<(Vec<u8>, (u32, u32))> {
            Err(crate::error::Error::TargetIncompatibility(
                "no decompressor available".into(),
            ))
        }
    }
}
