//! # Correlation Table
//!
//! Per-node table of indications this node sent and is still waiting on.
//!
//! ```text
//! [Idle] ──indicate_async──→ [Sent] ──respond──→ [Received] ──receive──→ [Idle]
//!                               │                                         ↑
//!                               └──────── response dispatched ────────────┘
//! ```
//!
//! Rows are reclaimed explicitly: by the receive path when a response is
//! dispatched, by a failed send, or by the caller via `Node::release_wait`.
//! Nothing expires on its own.
//!
//! The table itself is not synchronized; each node wraps it in its own lock.

use crate::envelope::SlotIndex;
use crate::error::{BusError, Resource, Result};
use crate::time::Tick;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Lifecycle of one wait row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum WaitState {
    /// Free.
    #[default]
    Idle,
    /// Indication dispatched, awaiting a response.
    Sent,
    /// Response sent by the peer, not yet dispatched by the requester.
    Received,
}

impl fmt::Display for WaitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WaitState::Idle => "IDLE",
            WaitState::Sent => "SENT",
            WaitState::Received => "RECEIVED",
        };
        f.write_str(name)
    }
}

/// One row of a correlation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WaitItem {
    pub sequence: u16,
    pub source: SlotIndex,
    pub destination: SlotIndex,
    pub sent_at: Tick,
    pub state: WaitState,
}

impl WaitItem {
    /// Row for a freshly dispatched indication.
    #[must_use]
    pub fn sent(sequence: u16, source: SlotIndex, destination: SlotIndex, sent_at: Tick) -> Self {
        Self {
            sequence,
            source,
            destination,
            sent_at,
            state: WaitState::Sent,
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == WaitState::Idle
    }

    /// Milliseconds since the indication was sent.
    #[must_use]
    pub fn age(&self, now: Tick) -> u64 {
        now.saturating_sub(self.sent_at)
    }
}

/// Fixed-capacity table of outstanding indications.
#[derive(Debug, Clone)]
pub struct CorrelationTable {
    rows: Vec<WaitItem>,
}

impl CorrelationTable {
    /// Creates a table with `capacity` idle rows.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: vec![WaitItem::default(); capacity],
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.rows.len()
    }

    /// Number of non-idle rows.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.rows.iter().filter(|row| !row.is_idle()).count()
    }

    /// Index of the first idle row.
    ///
    /// # Errors
    ///
    /// `NoMemory` when every row is in use.
    pub fn alloc(&self) -> Result<usize> {
        match self.rows.iter().position(WaitItem::is_idle) {
            Some(idx) => {
                debug!(idx, "Allocated wait row");
                Ok(idx)
            }
            None => {
                warn!(capacity = self.capacity(), "No free wait row");
                Err(BusError::NoMemory {
                    resource: Resource::WaitTable,
                    capacity: self.capacity(),
                })
            }
        }
    }

    /// Allocates a row and fills it in one step.
    ///
    /// # Errors
    ///
    /// `NoMemory` when every row is in use.
    pub fn insert(&mut self, item: WaitItem) -> Result<usize> {
        let idx = self.alloc()?;
        self.rows[idx] = item;
        Ok(idx)
    }

    /// Index of the non-idle row carrying `sequence`.
    #[must_use]
    pub fn find(&self, sequence: u16) -> Option<usize> {
        let found = self
            .rows
            .iter()
            .position(|row| !row.is_idle() && row.sequence == sequence);
        if found.is_none() {
            debug!(sequence, "Wait row not found");
        }
        found
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&WaitItem> {
        self.rows.get(idx)
    }

    /// Resets a row to idle, clearing every field.
    ///
    /// Returns the previous contents, or `None` for an out-of-range index.
    pub fn free(&mut self, idx: usize) -> Option<WaitItem> {
        let Some(row) = self.rows.get_mut(idx) else {
            warn!(idx, "Free of out-of-range wait row");
            return None;
        };
        debug!(idx, sequence = row.sequence, "Freeing wait row");
        Some(std::mem::take(row))
    }

    /// Moves a row from `Sent` to `Received`.
    ///
    /// Any other starting state is left untouched and reported; duplicate or
    /// late responses land here. Returns the state found before the call.
    pub fn mark_received(&mut self, idx: usize) -> Option<WaitState> {
        let row = self.rows.get_mut(idx)?;
        let previous = row.state;
        if previous == WaitState::Sent {
            row.state = WaitState::Received;
            debug!(idx, sequence = row.sequence, "Wait row marked received");
        } else {
            warn!(
                idx,
                sequence = row.sequence,
                state = %previous,
                "Unexpected wait row state for response"
            );
        }
        Some(previous)
    }

    /// Non-idle rows with their indices.
    pub fn active(&self) -> impl Iterator<Item = (usize, &WaitItem)> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| !row.is_idle())
    }

    /// Rows waiting longer than `max_age` milliseconds.
    #[must_use]
    pub fn stale(&self, now: Tick, max_age: u64) -> Vec<WaitItem> {
        self.active()
            .filter(|(_, row)| row.age(now) > max_age)
            .map(|(_, row)| *row)
            .collect()
    }
}
