/*!
# Replay-compatibility and liveness core.

This crate is the driver-agnostic core of a GL/GLES trace-replay system:
it models one recorded API call as a `Command`, simulates enough GL state
to answer "what would this call do", and chains that through a pipeline of
`Transformer`s that rewrite the stream for a target device and strip dead
work before it ever reaches a driver.

## Layout

- [`command`] — the command (atom) model, observations and extras.
- [`memory`] — the capture's observed-memory pool.
- [`id`] — stream positions and the sub-ids transformers derive from them.
- [`state`] — the simulated GL state the pipeline mutates as it runs.
- [`mutate`] — interprets one command against `state::State`.
- [`remap`] — id remapping and pointer valuation.
- [`pipeline`] — the `Transformer`/`Sink` traits and the chain driver.
- [`compat`] — the compatibility transformer bridging capture and target
  device semantics.
- [`depgraph`] — the dependency graph a command stream implies.
- [`liveness`] — the liveness tree and dead-code elimination pass.
- [`issues`] — the diagnostic issue-finder transformer.
- [`externs`] — the external collaborator traits (shader translator,
  texture decompressor, replay builder).
- [`error`] — the crate's error type.
*/

pub mod command;
pub mod compat;
pub mod depgraph;
pub mod error;
pub mod externs;
pub mod id;
pub mod issues;
pub mod liveness;
pub mod memory;
pub mod mutate;
pub mod pipeline;
pub mod remap;
pub mod state;

pub use error::{Error, Result};
