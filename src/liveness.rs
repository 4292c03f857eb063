//! Liveness tree and the backwards dead-atom removal pass.

use fxhash::FxHashMap;

use crate::command::Command;
use crate::depgraph::{attachment_data_key, behaviour, AddressSpace, Behaviour, StateAddress, StateKey};
use crate::id::CommandId;
use crate::state::State;

/// One node of the liveness tree.
///
/// `self_live` is this exact address's own resolution: `None` if the
/// address has never been touched, `Some(true)`/`Some(false)` once a read
/// or a satisfied write has resolved it one way or the other.
/// `descendant_live_count` counts how many bequeathed-live descendants
/// currently contribute liveness to this node (see `mark_live`/`mark_dead`);
/// it is what a query on a *group* key (e.g. `UniformGroup`) sees.
///
/// An ancestor whose own `self_live` is `Some(true)` covers every
/// descendant that has not itself been individually resolved — this is how
/// a draw call's coarse "reads the whole uniform group" demand reaches
/// back to whichever uniform write last touched a given location. But an
/// address that *has* been individually resolved (`Some(true)` or
/// `Some(false)`) keeps its own resolution rather than inheriting the
/// ancestor's: otherwise a uniform overwritten earlier in the stream could
/// never be found dead once any draw had read the group it belongs to.
#[derive(Clone, Copy, Debug, Default)]
struct LiveNode {
    self_live: Option<bool>,
    descendant_live_count: u32,
}

impl LiveNode {
    fn any_descendant_live(&self) -> bool {
        self.descendant_live_count > 0
    }
}

/// A lazy hierarchical liveness structure over `StateAddress`es.
///
/// `MarkLive`/`MarkDead` are worst-case O(depth) (they walk to the root to
/// bequeath/clear the descendant-live count) and typically O(1) because a
/// node whose count is already nonzero short-circuits the walk.
pub struct LivenessTree<'a> {
    addresses: &'a AddressSpace,
    nodes: FxHashMap<StateAddress, LiveNode>,
}

impl<'a> LivenessTree<'a> {
    pub fn new(addresses: &'a AddressSpace) -> Self {
        LivenessTree {
            addresses,
            nodes: FxHashMap::default(),
        }
    }

    fn node(&mut self, addr: StateAddress) -> LiveNode {
        self.nodes.get(&addr).copied().unwrap_or_default()
    }

    /// `isLive(address)`.
    pub fn is_live(&self, addr: StateAddress) -> bool {
        if let Some(node) = self.nodes.get(&addr) {
            if node.self_live == Some(true) || node.any_descendant_live() {
                return true;
            }
            if node.self_live == Some(false) {
                // Explicitly resolved dead; an ancestor's blanket liveness
                // covers untouched descendants, not this one.
                return false;
            }
        }
        let mut cur = addr;
        loop {
            let parent = self.addresses.parent_of(cur);
            if parent == cur {
                return false;
            }
            if let Some(node) = self.nodes.get(&parent) {
                if node.self_live == Some(true) {
                    return true;
                }
            }
            cur = parent;
        }
    }

    pub fn mark_live(&mut self, addr: StateAddress) {
        let mut node = self.node(addr);
        let already_live = node.self_live == Some(true);
        node.self_live = Some(true);
        self.nodes.insert(addr, node);
        if already_live {
            return;
        }
        // Bequeath upward: each ancestor's count gains one contributor from
        // this address. Stop once an ancestor already had a contributor —
        // everything above it was already incremented when that one arrived.
        let mut cur = addr;
        loop {
            let parent = self.addresses.parent_of(cur);
            if parent == cur {
                break;
            }
            let mut pnode = self.node(parent);
            pnode.descendant_live_count += 1;
            let first_contributor = pnode.descendant_live_count == 1;
            self.nodes.insert(parent, pnode);
            if !first_contributor {
                break;
            }
            cur = parent;
        }
    }

    pub fn mark_dead(&mut self, addr: StateAddress) {
        let mut node = self.node(addr);
        let was_live = node.self_live == Some(true);
        node.self_live = Some(false);
        self.nodes.insert(addr, node);
        if !was_live {
            return;
        }
        if self.node(addr).any_descendant_live() {
            // Still has live descendants bequeathed beneath it; its own
            // flag flipping doesn't change what its parent sees.
            return;
        }
        let mut cur = addr;
        loop {
            let parent = self.addresses.parent_of(cur);
            if parent == cur {
                break;
            }
            let mut pnode = self.node(parent);
            pnode.descendant_live_count = pnode.descendant_live_count.saturating_sub(1);
            let emptied = pnode.descendant_live_count == 0;
            self.nodes.insert(parent, pnode);
            if !emptied {
                break;
            }
            cur = parent;
        }
    }
}

/// The specific state addresses a requested observation point pins as
/// roots: the color/depth/stencil attachment data of the bound draw and
/// read framebuffers, at the state immediately before the command runs.
/// Mirrors the attachment walk `depgraph::behaviour` does for `DrawArrays`
/// and `Clear`; the default framebuffer (id 0) has no object-table entry,
/// so it is represented the same sentinel way `SwapBuffers`'s own
/// behaviour does.
fn observation_roots(addresses: &mut AddressSpace, state: &State) -> Vec<StateAddress> {
    let mut roots = Vec::new();
    let ctx = match state.current_context() {
        Some(ctx) => ctx,
        None => return roots,
    };
    let mut framebuffers = vec![ctx.bound.draw_framebuffer];
    if ctx.bound.read_framebuffer != ctx.bound.draw_framebuffer {
        framebuffers.push(ctx.bound.read_framebuffer);
    }
    for fb_id in framebuffers {
        if fb_id == 0 {
            roots.push(addresses.intern(StateKey::RenderbufferData { renderbuffer: 0 }));
            continue;
        }
        let fb = match ctx.objects.private.framebuffers.get(&fb_id) {
            Some(fb) => fb,
            None => continue,
        };
        for attachment in fb.color_attachments.iter().flatten() {
            roots.push(addresses.intern(attachment_data_key(attachment)));
        }
        if let Some(a) = &fb.depth_attachment {
            roots.push(addresses.intern(attachment_data_key(a)));
        }
        if let Some(a) = &fb.stencil_attachment {
            roots.push(addresses.intern(attachment_data_key(a)));
        }
    }
    roots
}

/// One of the user's requested observation points (`Request(commandId)`).
pub type Request = CommandId;

/// Runs the backwards dead-code pass over `commands` (already assumed to
/// be the compatibility transformer's output) and returns the surviving
/// `(id, Command)` pairs in their original relative order.
pub struct DeadCodeEliminator {
    requests: Vec<Request>,
    preserve_buffers_on_swap: bool,
}

impl DeadCodeEliminator {
    pub fn new(requests: Vec<Request>) -> Self {
        DeadCodeEliminator {
            requests,
            preserve_buffers_on_swap: false,
        }
    }

    pub fn preserve_buffers_on_swap(mut self, preserve: bool) -> Self {
        self.preserve_buffers_on_swap = preserve;
        self
    }

    /// `commands` paired with a replay of `state` up to each command so
    /// `behaviour` sees the binding points the command itself reads from.
    /// The caller supplies `states`, one snapshot *before* each command —
    /// building that is the transformer pipeline's job; here we only
    /// consume it.
    pub fn run(
        &self,
        commands: &[(CommandId, Command)],
        states_before: &[State],
    ) -> (Vec<(CommandId, Command)>, AddressSpace) {
        assert_eq!(commands.len(), states_before.len());
        let mut addresses = AddressSpace::new();
        let behaviours: Vec<Behaviour> = commands
            .iter()
            .zip(states_before.iter())
            .map(|((_, cmd), state)| {
                behaviour(&mut addresses, state, cmd, self.preserve_buffers_on_swap)
            })
            .collect();

        // Every address this pass will ever query must be interned before
        // `LivenessTree` borrows `addresses`, so observation roots are
        // computed here rather than inline in the backward scan below.
        let request_roots: Vec<Vec<StateAddress>> = commands
            .iter()
            .zip(states_before.iter())
            .map(|((id, _), state)| {
                if self.requests.contains(id) {
                    observation_roots(&mut addresses, state)
                } else {
                    Vec::new()
                }
            })
            .collect();

        let mut tree = LivenessTree::new(&addresses);
        let mut live = vec![false; commands.len()];

        for i in (0..commands.len()).rev() {
            let b = &behaviours[i];
            if b.aborted {
                continue;
            }
            let is_requested = self.requests.contains(&commands[i].0);
            if is_requested {
                live[i] = true;
                for addr in &request_roots[i] {
                    tree.mark_live(*addr);
                }
            }
            if b.keep_alive {
                live[i] = true;
            }
            let writes_live = b
                .writes
                .iter()
                .chain(b.modifies.iter())
                .any(|addr| tree.is_live(*addr));
            if writes_live {
                live[i] = true;
                for addr in b.writes.iter().chain(b.modifies.iter()) {
                    tree.mark_dead(*addr);
                }
            }
            if live[i] {
                for addr in b.reads.iter().chain(b.modifies.iter()) {
                    tree.mark_live(*addr);
                }
            }
        }

        let surviving = commands
            .iter()
            .zip(live.iter())
            .filter(|(_, &alive)| alive)
            .map(|(c, _)| c.clone())
            .collect();
        (surviving, addresses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_tree_consistency_invariant() {
        let mut addrs = AddressSpace::new();
        let child = addrs.intern(StateKey::TextureData { texture: 1 });
        let mut tree = LivenessTree::new(&addrs);
        assert!(!tree.is_live(child));
        tree.mark_live(child);
        assert!(tree.is_live(child));
        let parent = addrs.parent_of(child);
        assert!(tree.is_live(parent)); // bequeathed from descendant
    }

    #[test]
    fn mark_dead_clears_once_no_live_descendant_remains() {
        let mut addrs = AddressSpace::new();
        let a = addrs.intern(StateKey::TextureData { texture: 1 });
        let b = addrs.intern(StateKey::TextureData { texture: 2 });
        let mut tree = LivenessTree::new(&addrs);
        tree.mark_live(a);
        tree.mark_live(b);
        let root = addrs.parent_of(a);
        tree.mark_dead(a);
        assert!(tree.is_live(root)); // b still live
        tree.mark_dead(b);
        assert!(!tree.is_live(root));
    }

    #[test]
    fn ancestor_live_state_covers_only_untouched_descendants() {
        let mut addrs = AddressSpace::new();
        let child = addrs.intern(StateKey::TextureData { texture: 1 });
        let parent = addrs.parent_of(child);
        let mut tree = LivenessTree::new(&addrs);
        assert!(!tree.is_live(child));
        tree.mark_live(parent);
        // `child` has never been individually resolved, so it inherits the
        // ancestor's blanket liveness.
        assert!(tree.is_live(child));
        // Once `child` is explicitly resolved dead, that resolution takes
        // precedence over the ancestor.
        tree.mark_dead(child);
        assert!(!tree.is_live(child));
    }

    #[test]
    fn overwritten_uniform_is_dead_even_once_its_group_is_read() {
        let mut addrs = AddressSpace::new();
        let group = addrs.intern(StateKey::UniformGroup { program: 1 });
        let first_write = addrs.intern(StateKey::Uniform {
            program: 1,
            location: 0,
            count: 1,
        });
        let mut tree = LivenessTree::new(&addrs);
        // A draw (processed earlier in the backward scan, i.e. later in
        // time) reads the whole group.
        tree.mark_live(group);
        assert!(tree.is_live(first_write)); // inherited, never touched yet
        // Walking further back, the most recent write is found live and
        // resolved.
        assert!(tree.is_live(first_write));
        tree.mark_dead(first_write);
        // An even earlier write to the exact same location is shadowed by
        // that resolution, not by the group's blanket liveness.
        assert!(!tree.is_live(first_write));
    }
}
