//! # Diagnostics
//!
//! Read-only view of the bus for an operator console: per node, every
//! outstanding wait row with its age, plus mailbox fill and bus counters.
//!
//! Taking a snapshot holds the registry lock and, one at a time, each node's
//! correlation lock (the permitted order). Nothing is mutated.

use crate::bus::Bus;
use crate::correlation::WaitState;
use crate::envelope::SlotIndex;
use crate::time::Tick;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bus-wide delivery counters.
#[derive(Debug, Default)]
pub(crate) struct BusStats {
    delivered: AtomicU64,
    broadcast_dropped: AtomicU64,
    unicast_rejected: AtomicU64,
    unmatched_responses: AtomicU64,
}

impl BusStats {
    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_broadcast(&self, delivered: usize, dropped: usize) {
        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        self.broadcast_dropped
            .fetch_add(dropped as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.unicast_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmatched_response(&self) {
        self.unmatched_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            broadcast_dropped: self.broadcast_dropped.load(Ordering::Relaxed),
            unicast_rejected: self.unicast_rejected.load(Ordering::Relaxed),
            unmatched_responses: self.unmatched_responses.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Frames accepted by a mailbox.
    pub delivered: u64,
    /// Broadcast copies skipped because a mailbox was full or closed.
    pub broadcast_dropped: u64,
    /// Unicast sends that failed at the destination mailbox.
    pub unicast_rejected: u64,
    /// Responses with no matching wait row at the requester.
    pub unmatched_responses: u64,
}

/// One outstanding wait row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitSnapshot {
    pub slot: usize,
    pub sequence: u16,
    pub state: WaitState,
    pub source: SlotIndex,
    pub destination: SlotIndex,
    pub sent_at: Tick,
    pub waited_ms: u64,
}

/// One registered node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub index: SlotIndex,
    pub queued: usize,
    pub mailbox_depth: usize,
    pub wait_capacity: usize,
    pub waits: Vec<WaitSnapshot>,
}

/// Whole-bus view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusSnapshot {
    pub tick: Tick,
    pub initialized: bool,
    pub nodes: Vec<NodeSnapshot>,
    pub stats: StatsSnapshot,
}

impl BusSnapshot {
    /// Total outstanding waits across all nodes.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.nodes.iter().map(|node| node.waits.len()).sum()
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Propagates the `serde_json` serialization error.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Bus {
    /// Captures the current state of every node.
    #[must_use]
    pub fn snapshot(&self) -> BusSnapshot {
        let tick = self.now();
        let registry = self.inner.registry.lock();

        let nodes = registry
            .occupied()
            .filter(|node| node.is_initialized())
            .map(|node| {
                let waits = node.waits.lock();
                NodeSnapshot {
                    name: node.name.clone(),
                    index: node.index,
                    queued: node.mailbox.queued(),
                    mailbox_depth: node.mailbox.depth(),
                    wait_capacity: waits.capacity(),
                    waits: waits
                        .active()
                        .map(|(slot, row)| WaitSnapshot {
                            slot,
                            sequence: row.sequence,
                            state: row.state,
                            source: row.source,
                            destination: row.destination,
                            sent_at: row.sent_at,
                            waited_ms: row.age(tick),
                        })
                        .collect(),
                }
            })
            .collect();

        BusSnapshot {
            tick,
            initialized: registry.is_initialized(),
            nodes,
            stats: self.inner.stats.snapshot(),
        }
    }
}

impl fmt::Display for BusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.initialized {
            return writeln!(f, "Ebus not initialized!");
        }

        writeln!(f, "Ebus Wait Response Info - Current tick: {}", self.tick)?;
        for node in &self.nodes {
            writeln!(f)?;
            writeln!(
                f,
                "Node: {} (ID:{}) mailbox {}/{}",
                node.name, node.index, node.queued, node.mailbox_depth
            )?;
            for wait in &node.waits {
                writeln!(
                    f,
                    "  Slot[{}]: Seq=0x{:04X}, State={}, Src={}->Dst={}, SendTime={}, Wait={}ms",
                    wait.slot,
                    wait.sequence,
                    wait.state,
                    wait.source,
                    wait.destination,
                    wait.sent_at,
                    wait.waited_ms
                )?;
            }
            if node.waits.is_empty() {
                writeln!(f, "  No active wait responses")?;
            } else {
                writeln!(
                    f,
                    "  Active slots: {}/{}",
                    node.waits.len(),
                    node.wait_capacity
                )?;
            }
        }
        writeln!(
            f,
            "Delivered={} BroadcastDropped={} UnicastRejected={} UnmatchedResponses={}",
            self.stats.delivered,
            self.stats.broadcast_dropped,
            self.stats.unicast_rejected,
            self.stats.unmatched_responses
        )?;
        write!(f, "End of ebus wait response info")
    }
}
