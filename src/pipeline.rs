//! The chainable atom-stream transformer pipeline.
//!
//! Grounded on `gfx-backend-gl`'s command-buffer recording loop
//! (`CommandBuffer` owning a `Cache` it mutates while recording one
//! command after another), generalized from "one command buffer, one
//! cache" to "N chained transformers, one shared simulated `State`".

use crate::command::{Atom, Command};
use crate::id::CommandId;
use crate::state::State;

/// What a transformer writes into: `MutateAndWrite` mutates the shared
/// state then appends, `State()` gives read access to it.
pub trait Sink {
    fn mutate_and_write(&mut self, id: CommandId, cmd: Command);
    fn state(&self) -> &State;
    fn state_mut(&mut self) -> &mut State;
}

/// A stream rewriter: consumes one command, may read/mutate its own
/// private state, and writes zero or more commands to `out`.
pub trait Transformer {
    fn transform(&mut self, id: CommandId, cmd: Command, out: &mut dyn Sink);

    /// Called once after the last command; emits any deferred commands.
    fn flush(&mut self, _out: &mut dyn Sink) {}
}

/// The terminal sink: owns the simulated `State` and appends every command
/// it receives to `emitted`, in the order it receives them. This is what
/// the last stage of a `Pipeline` writes into.
pub struct CollectingSink {
    state: State,
    pub emitted: Vec<(CommandId, Command)>,
}

impl CollectingSink {
    pub fn new(state: State) -> Self {
        CollectingSink {
            state,
            emitted: Vec::new(),
        }
    }

    pub fn into_state(self) -> State {
        self.state
    }
}

impl Sink for CollectingSink {
    fn mutate_and_write(&mut self, id: CommandId, cmd: Command) {
        if let Err(err) = crate::mutate::mutate(&cmd, &mut self.state, None) {
            log::warn!("mutate failed for {:?}: {}", id, err);
        }
        self.emitted.push((id, cmd));
    }

    fn state(&self) -> &State {
        &self.state
    }

    fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }
}

/// A fixed chain of transformers. `run` pulls an original command stream
/// through every stage in order; ordering guarantees:
/// every original command reaches the final sink in capture order unless a
/// transformer explicitly drops it, and commands injected while processing
/// capture command `i` appear before `i` at the sink unless explicitly
/// emitted after.
pub struct Pipeline {
    stages: Vec<Box<dyn Transformer>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline { stages: Vec::new() }
    }

    pub fn push(mut self, stage: Box<dyn Transformer>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Drive `atoms` through every stage, writing the final result into
    /// `sink`. Each atom's read-observations are applied into the shared
    /// `State`'s memory pool immediately before the atom enters the first
    /// stage, per `spec.md` §4.1: "`observations.applyReads(memoryPool)`
    /// writes captured bytes into the designated pool before the call is
    /// interpreted."
    pub fn run(&mut self, atoms: Vec<Atom>, sink: &mut dyn Sink) {
        // Build the chain back-to-front: the writer passed to stage k is
        // stage k+1's input. `ForwardingSink` wraps the
        // next stage so a `Transform` call can recurse into it.
        run_stage(0, &mut self.stages, atoms, sink);
        flush_stage(0, &mut self.stages, sink);
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::new()
    }
}

fn apply_observations(atom: &Atom, sink: &mut dyn Sink) {
    if let Err(err) = atom.observations.apply_reads(&mut sink.state_mut().memory) {
        log::warn!(
            "failed to apply read-observations for {:?}: {}",
            atom.id,
            err
        );
    }
}

fn run_stage(
    index: usize,
    stages: &mut [Box<dyn Transformer>],
    atoms: Vec<Atom>,
    sink: &mut dyn Sink,
) {
    if index == stages.len() {
        for atom in atoms {
            apply_observations(&atom, sink);
            sink.mutate_and_write(atom.id, atom.command);
        }
        return;
    }
    let (head, tail) = stages.split_at_mut(index + 1);
    for atom in atoms {
        apply_observations(&atom, sink);
        let mut forward = ForwardingSink {
            tail,
            next_index: 0,
            terminal: sink,
        };
        head[index].transform(atom.id, atom.command, &mut forward);
    }
}

fn flush_stage(index: usize, stages: &mut [Box<dyn Transformer>], sink: &mut dyn Sink) {
    if index == stages.len() {
        return;
    }
    let (head, tail) = stages.split_at_mut(index + 1);
    let mut forward = ForwardingSink {
        tail,
        next_index: 0,
        terminal: sink,
    };
    head[index].flush(&mut forward);
}

/// Glues stage `k`'s output to stage `k+1`'s input, bottoming out at the
/// terminal sink once every stage has been passed through.
struct ForwardingSink<'a> {
    tail: &'a mut [Box<dyn Transformer>],
    next_index: usize,
    terminal: &'a mut dyn Sink,
}

impl<'a> Sink for ForwardingSink<'a> {
    fn mutate_and_write(&mut self, id: CommandId, cmd: Command) {
        if self.next_index == self.tail.len() {
            self.terminal.mutate_and_write(id, cmd);
            return;
        }
        let (head, rest) = self.tail.split_at_mut(self.next_index + 1);
        let mut forward = ForwardingSink {
            tail: rest,
            next_index: 0,
            terminal: self.terminal,
        };
        head[self.next_index].transform(id, cmd, &mut forward);
    }

    fn state(&self) -> &State {
        self.terminal.state()
    }

    fn state_mut(&mut self) -> &mut State {
        self.terminal.state_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::CommandId;
    use crate::state::State;

    struct PassThrough;
    impl Transformer for PassThrough {
        fn transform(&mut self, id: CommandId, cmd: Command, out: &mut dyn Sink) {
            out.mutate_and_write(id, cmd);
        }
    }

    struct Dropper;
    impl Transformer for Dropper {
        fn transform(&mut self, _id: CommandId, _cmd: Command, _out: &mut dyn Sink) {}
    }

    struct Duplicator;
    impl Transformer for Duplicator {
        fn transform(&mut self, id: CommandId, cmd: Command, out: &mut dyn Sink) {
            out.mutate_and_write(id, cmd.clone());
            out.mutate_and_write(id.derived(), cmd);
        }
    }

    fn cmds(n: u64) -> Vec<Atom> {
        (0..n)
            .map(|i| Atom::new(CommandId::original(i), Command::GetError))
            .collect()
    }

    #[test]
    fn empty_pipeline_forwards_everything_in_order() {
        let mut pipeline = Pipeline::new();
        let mut sink = CollectingSink::new(State::new());
        pipeline.run(cmds(3), &mut sink);
        assert_eq!(sink.emitted.len(), 3);
        assert_eq!(sink.emitted[0].0, CommandId::original(0));
    }

    #[test]
    fn a_stage_can_drop_commands() {
        let mut pipeline = Pipeline::new().push(Box::new(Dropper));
        let mut sink = CollectingSink::new(State::new());
        pipeline.run(cmds(3), &mut sink);
        assert!(sink.emitted.is_empty());
    }

    #[test]
    fn a_stage_can_inject_derived_commands_preserving_order() {
        let mut pipeline = Pipeline::new().push(Box::new(Duplicator));
        let mut sink = CollectingSink::new(State::new());
        pipeline.run(cmds(2), &mut sink);
        assert_eq!(sink.emitted.len(), 4);
        assert_eq!(sink.emitted[0].0, CommandId::original(0));
        assert_eq!(sink.emitted[1].0, CommandId::original(0).derived());
        assert_eq!(sink.emitted[2].0, CommandId::original(1));
    }

    #[test]
    fn chained_stages_compose_left_to_right() {
        let mut pipeline = Pipeline::new()
            .push(Box::new(PassThrough))
            .push(Box::new(Duplicator));
        let mut sink = CollectingSink::new(State::new());
        pipeline.run(cmds(1), &mut sink);
        assert_eq!(sink.emitted.len(), 2);
    }

    /// A read-observation attached to an atom must be visible in the
    /// shared memory pool by the time the *first* stage's `transform` runs
    /// for that atom, not only once it reaches the terminal sink.
    #[test]
    fn read_observations_are_applied_before_the_first_stage_sees_the_atom() {
        use crate::memory::{MemoryRange, Observation, Observations, PoolId};

        struct PoolReadingStage {
            seen: Vec<u8>,
        }
        impl Transformer for PoolReadingStage {
            fn transform(&mut self, id: CommandId, cmd: Command, out: &mut dyn Sink) {
                let range = MemoryRange {
                    pool: PoolId::Application,
                    base: 0x10,
                    size: 4,
                };
                self.seen = out.state().memory.read(range).map(|b| b.to_vec()).unwrap_or_default();
                out.mutate_and_write(id, cmd);
            }
        }

        let range = MemoryRange {
            pool: PoolId::Application,
            base: 0x10,
            size: 4,
        };
        let atom = Atom::new(CommandId::original(0), Command::GetError).with_observations(Observations {
            reads: vec![Observation {
                range,
                bytes: vec![1, 2, 3, 4],
            }],
            writes: vec![],
        });

        // `PoolReadingStage` can't report back through `Transformer`'s
        // signature, so drive it directly rather than through `Pipeline`.
        let mut sink = CollectingSink::new(State::new());
        apply_observations(&atom, &mut sink);
        let mut stage = PoolReadingStage { seen: Vec::new() };
        stage.transform(atom.id, atom.command, &mut sink);
        assert_eq!(stage.seen, vec![1, 2, 3, 4]);
    }
}
