//! Error kinds surfaced by the transformer pipeline.

use std::fmt;

use crate::id::CommandId;

/// The five error kinds the replay-compatibility core can raise.
///
/// A transformer's own mutate failure
/// does not abort the pipeline (the offending command is still forwarded
/// so the target driver sees the same call the capture did), it only
/// withholds that command's contribution to the dependency graph. Only
/// `Internal` errors raised from `Pipeline::flush` are fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An observation range overlaps invalidly, or a command references an
    /// object that cannot be synthesized.
    TraceMalformed(String),
    /// The capture uses a feature the target cannot emulate even after
    /// rewrites (e.g. instanced client arrays, transform feedback).
    TargetIncompatibility(String),
    /// The target driver returned a nonzero `glGetError` for a command.
    DriverError { code: u32, command: CommandId },
    /// The GLSL translator rejected a shader; the command is dropped.
    ShaderTranslationFailed(String),
    /// An invariant inside the core was violated while processing a
    /// command; that command is aborted (`Behaviour::aborted = true`) and
    /// processing continues with the next one.
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TraceMalformed(msg) => write!(f, "trace malformed: {}", msg),
            Error::TargetIncompatibility(msg) => write!(f, "target incompatibility: {}", msg),
            Error::DriverError { code, command } => {
                write!(f, "driver error {:#x} at command {:?}", code, command)
            }
            Error::ShaderTranslationFailed(msg) => write!(f, "shader translation failed: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
