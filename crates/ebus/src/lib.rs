//! # Ebus - In-Process Message Bus
//!
//! Named nodes exchange small fixed-size envelopes through bounded mailboxes.
//!
//! ## Message Types
//!
//! | Type | Addressing | Correlated |
//! |------|------------|------------|
//! | Broadcast | every other node | no |
//! | Notification | one node by name | no |
//! | Indication | one node by name | yes, wait row at the sender |
//! | Response | the requester of an indication | completes the wait row |
//!
//! ## Request / Response
//!
//! ```text
//! ┌──────────┐  indicate_async()   ┌──────────┐
//! │ Node A   │ ──────────────────→ │ Node B   │
//! │ [Sent]   │                     │ handler  │
//! │          │     respond()       │          │
//! │[Received]│ ←────────────────── │          │
//! └──────────┘                     └──────────┘
//!      │ receive(): IndicationAcknowledged, row freed
//!      ▼
//!   [Idle]
//! ```
//!
//! ## Capacities
//!
//! Every table is fixed at bus creation (see [`BusConfig`]). A full node
//! table or wait table is reported as `NoMemory`; a full unicast mailbox as
//! `QueueFull`. Broadcast skips full mailboxes.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod config;
pub mod correlation;
pub mod diagnostics;
pub mod envelope;
pub mod error;
pub mod mailbox;
pub mod node;
pub(crate) mod registry;
mod router;
pub mod time;

// Re-export main types
pub use bus::Bus;
pub use config::BusConfig;
pub use correlation::{CorrelationTable, WaitItem, WaitState};
pub use diagnostics::{BusSnapshot, NodeSnapshot, StatsSnapshot, WaitSnapshot};
pub use envelope::{Envelope, MessageType, SlotIndex, BROADCAST_INDEX, MAX_PAYLOAD_LEN};
pub use error::{BusError, Resource, Result, Status};
pub use mailbox::Wait;
pub use node::{handler_fn, EventKind, Node, NodeEvent, NodeHandler, NodeRef, Received};
pub use time::{ManualTicks, MonotonicTicks, Tick, TickSource};
