//! # Node Registry
//!
//! Fixed-capacity slot table mapping slot index to registered node, plus the
//! bus-wide sequence counter. The bus wraps the whole table in one lock;
//! nothing here takes a node lock.
//!
//! ## Invariants
//!
//! - A slot's index is its position in `slots`.
//! - No two occupied slots carry the same name.
//! - An occupied slot always holds an initialized node; teardown empties the
//!   slot before the node's resources are released.

use crate::envelope::SlotIndex;
use crate::node::NodeShared;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) struct Registry {
    slots: Vec<Option<Arc<NodeShared>>>,
    sequence: u16,
    initialized: bool,
}

impl Registry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            sequence: 0,
            initialized: true,
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub(crate) fn first_idle(&self) -> Option<SlotIndex> {
        let idx = self.slots.iter().position(Option::is_none);
        match idx {
            Some(idx) => debug!(idx, "Found idle slot"),
            None => warn!(capacity = self.capacity(), "No idle slots available in bus"),
        }
        // Capacity is validated below the broadcast sentinel.
        idx.map(|idx| idx as SlotIndex)
    }

    pub(crate) fn find_by_name(&self, name: &str) -> Option<&Arc<NodeShared>> {
        let found = self
            .occupied()
            .find(|node| node.is_initialized() && node.name == name);
        match found {
            Some(node) => debug!(name, idx = node.index, "Found node by name"),
            None => debug!(name, "Node not found by name"),
        }
        found
    }

    pub(crate) fn find_by_index(&self, index: SlotIndex) -> Option<&Arc<NodeShared>> {
        let found = self
            .slots
            .get(usize::from(index))
            .and_then(Option::as_ref)
            .filter(|node| node.is_initialized());
        match found {
            Some(node) => debug!(idx = index, name = %node.name, "Found node by index"),
            None => debug!(idx = index, "Node not found by index"),
        }
        found
    }

    pub(crate) fn insert(&mut self, node: Arc<NodeShared>) {
        let idx = usize::from(node.index);
        debug!(name = %node.name, idx, "Bus node registered");
        self.slots[idx] = Some(node);
    }

    /// Empties the slot if it still holds `node`.
    pub(crate) fn remove(&mut self, node: &Arc<NodeShared>) -> bool {
        let Some(slot) = self.slots.get_mut(usize::from(node.index)) else {
            return false;
        };
        match slot {
            Some(current) if Arc::ptr_eq(current, node) => {
                *slot = None;
                debug!(idx = node.index, name = %node.name, "Bus node unregistered");
                true
            }
            _ => false,
        }
    }

    /// Issues the next sequence number; wraps at `u16::MAX`.
    pub(crate) fn next_sequence(&mut self) -> u16 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    pub(crate) fn occupied(&self) -> impl Iterator<Item = &Arc<NodeShared>> {
        self.slots.iter().flatten()
    }

    /// Marks the table torn down and hands back every registered node.
    pub(crate) fn teardown(&mut self) -> Vec<Arc<NodeShared>> {
        self.initialized = false;
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}
