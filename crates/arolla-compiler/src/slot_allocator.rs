//! Compile-time slot allocation with lifetime-based reuse.
//!
//! For every slot the allocator tracks the set of expression nodes that
//! still need to read it. Once the set drains, the slot returns to a
//! per-qtype free list and later temporaries reuse its bytes. Literal slots
//! never recycle (they must survive re-execution), and input slots recycle
//! only when the caller explicitly allows overwriting inputs. Aliases
//! (annotation pass-throughs, subslot views, reinterpret casts) extend the
//! source slot's lifetime instead of allocating.

use rustc_hash::{FxHashMap, FxHashSet};

use arolla_core::{Fingerprint, FrameLayoutBuilder, QTypePtr, TypedSlot};
use arolla_expr::{ExprNodeRef, get_debug_snippet, visitor_order};
use indexmap::IndexMap;

use crate::errors::CompileError;

struct SlotState {
    slot: TypedSlot,
    /// Nodes that will still read this slot.
    remaining_consumers: FxHashSet<Fingerprint>,
    recyclable: bool,
    released: bool,
}

pub struct SlotAllocator {
    /// Per expression node: the set of its direct consumers in the DAG.
    node_consumers: FxHashMap<Fingerprint, FxHashSet<Fingerprint>>,
    /// Node fingerprint to the state of the slot holding its value. Aliased
    /// nodes share one state.
    node_states: FxHashMap<Fingerprint, usize>,
    states: Vec<SlotState>,
    free_slots: FxHashMap<Fingerprint, Vec<TypedSlot>>,
}

impl SlotAllocator {
    /// Prepares consumer sets for `prepared_expr` and seeds the leaf slots
    /// from the input-slot map.
    pub fn new(
        prepared_expr: &ExprNodeRef,
        input_slots: &IndexMap<String, TypedSlot>,
        allow_reusing_leaves: bool,
    ) -> SlotAllocator {
        let mut node_consumers: FxHashMap<Fingerprint, FxHashSet<Fingerprint>> =
            FxHashMap::default();
        let nodes = visitor_order(prepared_expr);
        for node in &nodes {
            for dep in node.node_deps() {
                node_consumers.entry(dep.fingerprint()).or_default().insert(node.fingerprint());
            }
        }
        let mut allocator = SlotAllocator {
            node_consumers,
            node_states: FxHashMap::default(),
            states: Vec::new(),
            free_slots: FxHashMap::default(),
        };
        for node in &nodes {
            if let Some(key) = node.leaf_key()
                && let Some(&slot) = input_slots.get(key)
            {
                allocator.insert_state(node, slot, allow_reusing_leaves);
            }
        }
        allocator
    }

    fn insert_state(&mut self, node: &ExprNodeRef, slot: TypedSlot, recyclable: bool) {
        let remaining_consumers =
            self.node_consumers.get(&node.fingerprint()).cloned().unwrap_or_default();
        self.states.push(SlotState { slot, remaining_consumers, recyclable, released: false });
        self.node_states.insert(node.fingerprint(), self.states.len() - 1);
    }

    /// Slot for `node`'s output. With `allow_recycled`, a dead slot of the
    /// same qtype is reused; otherwise (literals) a fresh pinned slot is
    /// appended.
    pub fn add_slot_for_node(
        &mut self,
        node: &ExprNodeRef,
        qtype: QTypePtr,
        allow_recycled: bool,
        layout_builder: &mut FrameLayoutBuilder,
    ) -> TypedSlot {
        let slot = if allow_recycled {
            self.free_slots
                .get_mut(&qtype.fingerprint())
                .and_then(|slots| slots.pop())
                .unwrap_or_else(|| layout_builder.add_slot(qtype))
        } else {
            layout_builder.add_slot(qtype)
        };
        self.insert_state(node, slot, allow_recycled);
        slot
    }

    /// Registers `node` as an alias of `origin`'s slot: the slot stays live
    /// until every consumer of `node` is compiled.
    pub fn extend_slot_lifetime(
        &mut self,
        origin: &ExprNodeRef,
        node: &ExprNodeRef,
    ) -> Result<(), CompileError> {
        let Some(&state_index) = self.node_states.get(&origin.fingerprint()) else {
            return Err(CompileError::internal(format!(
                "no slot is allocated for {}",
                get_debug_snippet(origin)
            )));
        };
        let node_consumers =
            self.node_consumers.get(&node.fingerprint()).cloned().unwrap_or_default();
        let state = &mut self.states[state_index];
        state.remaining_consumers.remove(&node.fingerprint());
        state.remaining_consumers.extend(node_consumers);
        self.node_states.insert(node.fingerprint(), state_index);
        Ok(())
    }

    /// Marks `node`'s reads as done: each dependency slot drops `node` from
    /// its consumer set, and drained recyclable slots return to the free
    /// lists.
    pub fn release_slots_not_needed_after(
        &mut self,
        node: &ExprNodeRef,
    ) -> Result<(), CompileError> {
        let mut seen = FxHashSet::default();
        for dep in node.node_deps() {
            if !seen.insert(dep.fingerprint()) {
                continue;
            }
            let Some(&state_index) = self.node_states.get(&dep.fingerprint()) else {
                // Dependencies bound to forced output slots are not tracked.
                continue;
            };
            let state = &mut self.states[state_index];
            state.remaining_consumers.remove(&node.fingerprint());
            if state.remaining_consumers.is_empty() && state.recyclable && !state.released {
                state.released = true;
                self.free_slots
                    .entry(state.slot.qtype().fingerprint())
                    .or_default()
                    .push(state.slot);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "slot_allocator_tests.rs"]
mod slot_allocator_tests;