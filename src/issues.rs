//! The issue finder: a diagnostic transformer that re-runs the stream
//! against a target driver and reports mismatches between the capture's
//! recorded error, the simulator's view, and what the target actually
//! returned.
//!
//! Grounded on `gfx-backend-gl`'s `Share::check`, which calls
//! `gl.get_error()` after a GL call and turns a nonzero code into an
//! `Err`. Here the same check runs three ways at once (capture, simulator,
//! target) and disagreements are logged rather than propagated: a capture
//! replay should keep going past driver errors so a single pass surfaces
//! every issue, not just the first one.

use crate::command::{Command, Extra, GlEnum, ObjectId};
use crate::externs::{PostbackSource, ReplayBuilder};
use crate::id::CommandId;
use crate::pipeline::{Sink, Transformer};

const GL_NO_ERROR: GlEnum = 0;
const COMPILE_STATUS: GlEnum = 0x8B81;
const LINK_STATUS: GlEnum = 0x8B82;

/// Severity levels assigned to a mismatch between capture, simulator and target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Best-effort checks, e.g. precompiled binary portability.
    Warning,
    /// The target produced an error the simulator also produced
    /// (propagation is acceptable, but still surfaced).
    Error,
    /// The capture recorded no error but either the simulator or the
    /// target produced one.
    Fatal,
}

fn captured_error(cmd: &Command) -> Option<GlEnum> {
    let extras: &[Extra] = match cmd {
        Command::EglMakeCurrent { extras, .. } => extras,
        Command::LinkProgram { extras, .. } => extras,
        Command::ProgramBinary { extras, .. } => extras,
        _ => return None,
    };
    extras.iter().find_map(|e| match e {
        Extra::ErrorState { error } => Some(*error),
        _ => None,
    })
}

fn decode_status(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    let n = bytes.len().min(4);
    buf[..n].copy_from_slice(&bytes[..n]);
    u32::from_le_bytes(buf)
}

fn log_mismatch(id: CommandId, severity: Severity, message: &str) {
    match severity {
        Severity::Fatal => log::error!("{:?}: Fatal: {}", id, message),
        Severity::Error => log::warn!("{:?}: Error: {}", id, message),
        Severity::Warning => log::warn!("{:?}: Warning: {}", id, message),
    }
}

/// Re-runs every command against `builder`'s target and cross-checks its
/// `glGetError` against the simulator's own view and the capture's
/// recorded error. Generic over the builder so it stays
/// testable with `crate::externs::doubles::NullReplayBuilder`.
pub struct IssueFinder<B: ReplayBuilder> {
    builder: B,
}

impl<B: ReplayBuilder> IssueFinder<B> {
    pub fn new(builder: B) -> Self {
        IssueFinder { builder }
    }

    pub fn into_builder(self) -> B {
        self.builder
    }

    fn check_driver_error(&mut self, id: CommandId, capture_error: Option<GlEnum>, simulated_error: bool) {
        self.builder.call(&Command::GetError);
        let capture_reported = capture_error.map_or(false, |e| e != GL_NO_ERROR);
        self.builder.post(
            PostbackSource::Absolute(0),
            4,
            Box::new(move |bytes| {
                let driver_error = decode_status(bytes);
                let driver_reported = driver_error != GL_NO_ERROR;
                if !driver_reported && !simulated_error {
                    return;
                }
                if driver_reported {
                    let err = crate::error::Error::DriverError {
                        code: driver_error,
                        command: id,
                    };
                    if !capture_reported {
                        log_mismatch(id, Severity::Fatal, &format!("{} (not recorded by the capture)", err));
                    } else if simulated_error {
                        log_mismatch(id, Severity::Error, &format!("{} (also raised by the simulator)", err));
                    }
                } else if simulated_error && !capture_reported {
                    log_mismatch(
                        id,
                        Severity::Fatal,
                        "simulator raised an error the capture never recorded",
                    );
                }
            }),
        );
    }

    fn check_compile_status(&mut self, id: CommandId, shader: ObjectId) {
        self.builder.call(&Command::GenericGet { pname: COMPILE_STATUS });
        self.builder.post(
            PostbackSource::Absolute(0),
            4,
            Box::new(move |bytes| {
                if decode_status(bytes) == 0 {
                    log_mismatch(
                        id,
                        Severity::Warning,
                        &format!("shader {} failed to compile on the target", shader),
                    );
                }
            }),
        );
    }

    fn check_link_status(&mut self, id: CommandId, program: ObjectId) {
        self.builder.call(&Command::GenericGet { pname: LINK_STATUS });
        self.builder.post(
            PostbackSource::Absolute(0),
            4,
            Box::new(move |bytes| {
                if decode_status(bytes) == 0 {
                    log_mismatch(
                        id,
                        Severity::Warning,
                        &format!("program {} failed to link on the target", program),
                    );
                }
            }),
        );
    }
}

impl<B: ReplayBuilder> Transformer for IssueFinder<B> {
    fn transform(&mut self, id: CommandId, cmd: Command, out: &mut dyn Sink) {
        let capture_error = captured_error(&cmd);

        // A dry-run mutate against a scratch copy of the shared state: it
        // tells us whether the simulator itself would flag this command,
        // without disturbing the state `out` is about to advance for real.
        let mut probe = out.state().clone();
        let simulated_error = crate::mutate::mutate(&cmd, &mut probe, None).is_err();

        if let Command::ShaderSource { shader, source } = &cmd {
            if source.trim().is_empty() {
                log_mismatch(
                    id,
                    Severity::Warning,
                    &format!("shader {} source reaching the target is empty", shader),
                );
            }
        }
        let post_check = match &cmd {
            Command::CompileShader(shader) => Some(PostCheck::Compile(*shader)),
            Command::LinkProgram { program, .. } => Some(PostCheck::Link(*program)),
            Command::ProgramBinary { program, .. } => Some(PostCheck::PrecompiledBinary(*program)),
            _ => None,
        };

        out.mutate_and_write(id, cmd);

        self.check_driver_error(id, capture_error, simulated_error);
        match post_check {
            Some(PostCheck::Compile(shader)) => self.check_compile_status(id, shader),
            Some(PostCheck::Link(program)) => self.check_link_status(id, program),
            Some(PostCheck::PrecompiledBinary(program)) => log_mismatch(
                id,
                Severity::Warning,
                &format!("precompiled binary for program {} may not be portable to the target", program),
            ),
            None => {}
        }
    }
}

enum PostCheck {
    Compile(ObjectId),
    Link(ObjectId),
    PrecompiledBinary(ObjectId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::externs::doubles::NullReplayBuilder;
    use crate::pipeline::CollectingSink;
    use crate::state::State;

    fn run(cmds: Vec<Command>) -> CollectingSink {
        let mut finder = IssueFinder::new(NullReplayBuilder::default());
        let mut sink = CollectingSink::new(State::new());
        for (i, cmd) in cmds.into_iter().enumerate() {
            finder.transform(CommandId::original(i as u64), cmd, &mut sink);
        }
        sink
    }

    #[test]
    fn forwards_every_command_unchanged() {
        let sink = run(vec![Command::GetError, Command::CompileShader(1)]);
        assert_eq!(sink.emitted.len(), 2);
    }

    #[test]
    fn empty_shader_source_does_not_panic_and_still_forwards() {
        let sink = run(vec![Command::ShaderSource {
            shader: 1,
            source: String::new(),
        }]);
        assert_eq!(sink.emitted.len(), 1);
    }

    #[test]
    fn program_binary_forwards_and_is_diagnostic_only() {
        let sink = run(vec![Command::ProgramBinary {
            program: 1,
            binary_format: 0,
            data: crate::command::CapturePointer { address: 0 },
            length: 0,
            extras: Vec::new(),
            suffix_oes: false,
        }]);
        assert_eq!(sink.emitted.len(), 1);
    }
}
