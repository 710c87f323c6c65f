//! Bus capacities, from defaults or environment variables.

use crate::envelope::BROADCAST_INDEX;
use crate::error::{BusError, Result};
use std::env;
use std::time::Duration;

/// Default number of registry slots.
pub const DEFAULT_MAX_NODES: usize = 10;

/// Default mailbox depth per node, in envelopes.
pub const DEFAULT_MAILBOX_DEPTH: usize = 10;

/// Default number of outstanding indications per node.
pub const DEFAULT_MAX_WAITS: usize = 10;

/// Default node name buffer length (names hold one byte less).
pub const DEFAULT_NAME_LEN: usize = 32;

/// Default age after which an outstanding indication counts as stale.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Capacity limits for one bus.
///
/// Every table is sized from here at creation and never grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Registry slots.
    pub max_nodes: usize,

    /// Mailbox depth per node.
    pub mailbox_depth: usize,

    /// Correlation table rows per node.
    pub max_waits: usize,

    /// Name buffer length; the longest accepted name is one byte shorter.
    pub name_len: usize,

    /// Age at which `Node::stale_waits` reports an outstanding indication.
    pub default_wait_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_nodes: DEFAULT_MAX_NODES,
            mailbox_depth: DEFAULT_MAILBOX_DEPTH,
            max_waits: DEFAULT_MAX_WAITS,
            name_len: DEFAULT_NAME_LEN,
            default_wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `EBUS_MAX_NODES`: registry slots (default: 10)
    /// - `EBUS_MAILBOX_DEPTH`: mailbox depth (default: 10)
    /// - `EBUS_MAX_WAITS`: outstanding indications per node (default: 10)
    /// - `EBUS_NAME_LEN`: name buffer length (default: 32)
    /// - `EBUS_WAIT_TIMEOUT_MS`: stale wait threshold (default: 1000)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        fn read(key: &str, default: usize) -> usize {
            env::var(key)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        }

        Self {
            max_nodes: read("EBUS_MAX_NODES", DEFAULT_MAX_NODES),
            mailbox_depth: read("EBUS_MAILBOX_DEPTH", DEFAULT_MAILBOX_DEPTH),
            max_waits: read("EBUS_MAX_WAITS", DEFAULT_MAX_WAITS),
            name_len: read("EBUS_NAME_LEN", DEFAULT_NAME_LEN),
            default_wait_timeout: env::var("EBUS_WAIT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_WAIT_TIMEOUT),
        }
    }

    /// Longest accepted node name, in bytes.
    #[must_use]
    pub fn max_name_len(&self) -> usize {
        self.name_len.saturating_sub(1)
    }

    /// Rejects capacities the bus cannot honour.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for zero capacities, or a node count that would
    /// collide with the broadcast sentinel index.
    pub fn validate(&self) -> Result<()> {
        if self.max_nodes == 0 || self.max_nodes >= usize::from(BROADCAST_INDEX) {
            return Err(BusError::InvalidArgument(format!(
                "max_nodes must be in 1..{BROADCAST_INDEX}, got {}",
                self.max_nodes
            )));
        }
        if self.mailbox_depth == 0 {
            return Err(BusError::InvalidArgument(
                "mailbox_depth must be at least 1".to_string(),
            ));
        }
        if self.max_waits == 0 {
            return Err(BusError::InvalidArgument(
                "max_waits must be at least 1".to_string(),
            ));
        }
        if self.name_len < 2 {
            return Err(BusError::InvalidArgument(
                "name_len must leave room for at least one byte".to_string(),
            ));
        }
        Ok(())
    }
}
