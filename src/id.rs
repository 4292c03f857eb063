//! Stable command ids and the derived sub-ids transformers inject with.

use std::fmt;

/// Position of a command within the original capture stream, or a sub-id
/// derived from one while a transformer is processing it.
///
/// Original ids are monotonic and dense. A derived id stays addressable
/// (for dependency-graph bookkeeping and for the issue finder correlating
/// postbacks) without disturbing the numbering of the original stream:
/// internally it is `(parent, sequence)`, ordered immediately after
/// `parent` and before `parent + 1`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId {
    parent: u64,
    derived: u32,
}

impl CommandId {
    /// Wrap a raw position in the original capture stream.
    pub fn original(index: u64) -> Self {
        CommandId {
            parent: index,
            derived: 0,
        }
    }

    /// Produce the next sub-id derived from this command.
    ///
    /// Calling `derived()` repeatedly on the same id yields distinct,
    /// increasing sub-ids, so a transformer emitting several injected
    /// commands while processing one original command can address each of
    /// them individually.
    pub fn derived(self) -> Self {
        CommandId {
            parent: self.parent,
            derived: self.derived + 1,
        }
    }

    pub fn is_derived(self) -> bool {
        self.derived != 0
    }

    pub fn parent(self) -> u64 {
        self.parent
    }
}

/// Yields successive `derived()` ids from a common parent, so a transformer
/// injecting several commands while processing one original command can
/// give each of them a distinct, increasing id instead of colliding on the
/// same `derived()` value.
pub struct DerivedIds(CommandId);

impl CommandId {
    pub fn derived_seq(self) -> DerivedIds {
        DerivedIds(self)
    }
}

impl DerivedIds {
    pub fn next(&mut self) -> CommandId {
        self.0 = self.0.derived();
        self.0
    }
}

impl fmt::Debug for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.derived == 0 {
            write!(f, "#{}", self.parent)
        } else {
            write!(f, "#{}.{}", self.parent, self.derived)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ids_order_before_next_original() {
        let a = CommandId::original(5);
        let d1 = a.derived();
        let d2 = d1.derived();
        assert!(a < d1);
        assert!(d1 < d2);
        assert!(d2 < CommandId::original(6));
        assert!(!a.is_derived());
        assert!(d1.is_derived());
    }
}
