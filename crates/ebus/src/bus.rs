//! # Bus Facade
//!
//! The bus context object: registry, sequence counter, tick source and
//! counters behind one cheap-to-clone handle. Nodes register here and send
//! through the four verbs below, each of which stamps the envelope and hands
//! it to the router.
//!
//! ## Lock Ordering
//!
//! Two lock domains exist: the registry lock (one per bus) and the
//! correlation lock (one per node). The registry lock may be held while a
//! node lock is taken; a node lock is never held while taking the registry
//! lock. Every verb below releases one before acquiring the other.

use crate::config::BusConfig;
use crate::correlation::WaitItem;
use crate::diagnostics::BusStats;
use crate::envelope::{Envelope, MessageType, SlotIndex, BROADCAST_INDEX};
use crate::error::{BusError, Resource, Result};
use crate::mailbox::mailbox;
use crate::node::{Node, NodeHandler, NodeRef, NodeShared};
use crate::registry::Registry;
use crate::time::{MonotonicTicks, Tick, TickSource};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub(crate) struct BusInner {
    pub(crate) config: BusConfig,
    pub(crate) registry: Mutex<Registry>,
    pub(crate) ticks: Arc<dyn TickSource>,
    pub(crate) stats: BusStats,
}

/// Handle to one message bus.
///
/// Clones share the same bus. Create it once at startup with [`Bus::new`];
/// [`Bus::shutdown`] invalidates every registered node.
#[derive(Clone)]
pub struct Bus {
    pub(crate) inner: Arc<BusInner>,
}

impl Bus {
    /// Creates a bus using the monotonic clock.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the configuration fails validation.
    pub fn new(config: BusConfig) -> Result<Self> {
        Self::with_tick_source(config, Arc::new(MonotonicTicks::new()))
    }

    /// Creates a bus with default capacities.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::build(BusConfig::default(), Arc::new(MonotonicTicks::new()))
    }

    /// Creates a bus driven by a custom tick source.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the configuration fails validation.
    pub fn with_tick_source(config: BusConfig, ticks: Arc<dyn TickSource>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, ticks))
    }

    fn build(config: BusConfig, ticks: Arc<dyn TickSource>) -> Self {
        debug!(
            max_nodes = config.max_nodes,
            mailbox_depth = config.mailbox_depth,
            max_waits = config.max_waits,
            "Creating ebus"
        );
        let registry = Registry::new(config.max_nodes);
        Self {
            inner: Arc::new(BusInner {
                config,
                registry: Mutex::new(registry),
                ticks,
                stats: BusStats::default(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Current tick of the bus clock.
    #[must_use]
    pub fn now(&self) -> Tick {
        self.inner.ticks.now()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.registry.lock().is_initialized()
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Tears the bus down: every node is removed and invalidated.
    ///
    /// Returns the number of nodes that were still registered. A second call
    /// is a no-op.
    pub fn shutdown(&self) -> usize {
        let nodes = {
            let mut registry = self.inner.registry.lock();
            if !registry.is_initialized() {
                warn!("Bus not initialized, skip destroy");
                return 0;
            }
            let nodes = registry.teardown();
            for node in &nodes {
                node.invalidate();
            }
            nodes
        };

        for node in &nodes {
            debug!(name = %node.name, idx = node.index, "Node invalidated by bus shutdown");
        }
        debug!(nodes = nodes.len(), "Ebus destroyed");
        nodes.len()
    }

    // =========================================================================
    // REGISTRY
    // =========================================================================

    /// Registers a node under `name`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` - empty name or longer than the configured limit
    /// - `DuplicateName` - a node with this name is already registered
    /// - `NoMemory` - every slot is taken
    /// - `NotInitialized` - the bus was shut down
    pub fn register<H>(&self, name: &str, handler: H) -> Result<Node>
    where
        H: NodeHandler + 'static,
    {
        let max_len = self.inner.config.max_name_len();
        if name.is_empty() || name.len() > max_len {
            error!(name, max_len, "Invalid node name");
            return Err(BusError::InvalidArgument(format!(
                "node name must be 1..={max_len} bytes, got {}",
                name.len()
            )));
        }

        debug!(name, "Creating node");

        let (sender, receiver) = mailbox(self.inner.config.mailbox_depth);

        let shared = {
            let mut registry = self.inner.registry.lock();
            if !registry.is_initialized() {
                error!(name, "Register on a bus that was shut down");
                return Err(BusError::NotInitialized);
            }
            if registry.find_by_name(name).is_some() {
                warn!(name, "Node name already registered");
                return Err(BusError::DuplicateName(name.to_string()));
            }
            let Some(index) = registry.first_idle() else {
                error!(name, "No available slots for node");
                return Err(BusError::NoMemory {
                    resource: Resource::NodeTable,
                    capacity: registry.capacity(),
                });
            };
            let shared = Arc::new(NodeShared::new(
                name,
                index,
                sender,
                self.inner.config.max_waits,
            ));
            registry.insert(Arc::clone(&shared));
            shared
        };

        debug!(name, idx = shared.index, "Node created");
        Ok(Node::new(self.clone(), shared, receiver, Arc::new(handler)))
    }

    /// Deregisters `node`. Equivalent to [`Node::deregister`].
    pub fn deregister(&self, node: Node) {
        node.deregister();
    }

    /// Slot first, then owned state. Invalidation and slot removal happen in
    /// one registry critical section.
    pub(crate) fn release(&self, node: &Arc<NodeShared>) {
        {
            let mut registry = self.inner.registry.lock();
            if !node.invalidate() {
                drop(registry);
                warn!(name = %node.name, "Node not initialized");
                return;
            }
            registry.remove(node);
        }

        debug!(name = %node.name, idx = node.index, "Node removed from bus");

        let mut waits = node.waits.lock();
        let outstanding: Vec<usize> = waits.active().map(|(idx, _)| idx).collect();
        for idx in outstanding {
            waits.free(idx);
        }
        drop(waits);

        debug!(name = %node.name, "Node destroyed");
    }

    /// Looks up a registered node by name.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<NodeRef> {
        self.inner.registry.lock().find_by_name(name).map(NodeRef::new)
    }

    /// Looks up a registered node by slot index.
    #[must_use]
    pub fn find_by_index(&self, index: SlotIndex) -> Option<NodeRef> {
        self.inner
            .registry
            .lock()
            .find_by_index(index)
            .map(NodeRef::new)
    }

    fn resolve_name(&self, name: &str) -> Result<Arc<NodeShared>> {
        self.inner
            .registry
            .lock()
            .find_by_name(name)
            .cloned()
            .ok_or_else(|| BusError::NodeNotFound(name.to_string()))
    }

    fn next_sequence(&self) -> Result<u16> {
        let mut registry = self.inner.registry.lock();
        if !registry.is_initialized() {
            return Err(BusError::NotInitialized);
        }
        Ok(registry.next_sequence())
    }

    fn ensure_sender<'a>(&self, node: &'a Node) -> Result<&'a Arc<NodeShared>> {
        let shared = node.shared();
        if !Arc::ptr_eq(&node.bus().inner, &self.inner) {
            error!(node = %shared.name, "Send through a bus the node is not registered on");
            return Err(BusError::InvalidArgument(format!(
                "node {} belongs to another bus",
                shared.name
            )));
        }
        if !shared.is_initialized() {
            error!(node = %shared.name, "Send from uninitialized node");
            return Err(BusError::NotInitialized);
        }
        Ok(shared)
    }

    /// Resolves a requester handle to the node currently registered here.
    fn resolve_requester(&self, requester: &NodeRef) -> Result<Arc<NodeShared>> {
        let Some(target) = requester.upgrade() else {
            error!(to = requester.name(), "Requester no longer registered");
            return Err(BusError::NodeNotFound(requester.name().to_string()));
        };
        let registered = self
            .inner
            .registry
            .lock()
            .find_by_index(target.index)
            .is_some_and(|current| Arc::ptr_eq(current, &target));
        if !registered {
            error!(to = requester.name(), "Requester is not registered on this bus");
            return Err(BusError::InvalidArgument(format!(
                "requester {} belongs to another bus",
                requester.name()
            )));
        }
        Ok(target)
    }

    // =========================================================================
    // VERBS
    // =========================================================================

    /// Sends `envelope` to every other registered node.
    ///
    /// Best effort: a full mailbox drops that copy and the call still
    /// succeeds. Returns the stamped envelope.
    pub fn broadcast(&self, node: &Node, mut envelope: Envelope) -> Result<Envelope> {
        let sender = self.ensure_sender(node)?;

        debug!(from = %sender.name, evt = envelope.event_id(), "Broadcasting");

        let sequence = self.next_sequence()?;
        envelope.stamp(
            MessageType::Broadcast,
            sender.index,
            BROADCAST_INDEX,
            sequence,
            self.now(),
        );
        self.send(sender, None, &envelope)?;
        Ok(envelope)
    }

    /// Sends a notification to the node named `destination`.
    ///
    /// # Errors
    ///
    /// `NodeNotFound` for an unknown name, `QueueFull` when the destination
    /// mailbox is saturated.
    pub fn notify(
        &self,
        node: &Node,
        destination: &str,
        mut envelope: Envelope,
    ) -> Result<Envelope> {
        let sender = self.ensure_sender(node)?;

        debug!(
            from = %sender.name,
            to = destination,
            evt = envelope.event_id(),
            "Sending notification"
        );

        let target = self.resolve_name(destination).inspect_err(|_| {
            error!(to = destination, "Target node not found for notification");
        })?;

        let sequence = self.next_sequence()?;
        envelope.stamp(
            MessageType::Notification,
            sender.index,
            target.index,
            sequence,
            self.now(),
        );
        self.send(sender, Some(&target), &envelope)?;
        Ok(envelope)
    }

    /// Sends an indication to `destination` and records a wait row for it.
    ///
    /// The response is delivered through the sender's handler as
    /// `IndicationAcknowledged`, which also frees the row. Returns the
    /// stamped envelope; its sequence number identifies the wait.
    ///
    /// # Errors
    ///
    /// - `NodeNotFound` - unknown destination
    /// - `NoMemory` - the sender's wait table is full
    /// - any send error; the wait row is freed before returning it
    pub fn indicate_async(
        &self,
        node: &Node,
        destination: &str,
        mut envelope: Envelope,
    ) -> Result<Envelope> {
        let sender = self.ensure_sender(node)?;

        debug!(
            from = %sender.name,
            to = destination,
            evt = envelope.event_id(),
            "Sending async indication"
        );

        let target = self.resolve_name(destination).inspect_err(|_| {
            error!(to = destination, "Target node not found for async indication");
        })?;

        let sequence = self.next_sequence()?;
        let now = self.now();
        envelope.stamp(
            MessageType::Indication,
            sender.index,
            target.index,
            sequence,
            now,
        );

        let slot = sender
            .waits
            .lock()
            .insert(WaitItem::sent(sequence, sender.index, target.index, now))
            .inspect_err(|_| {
                error!(node = %sender.name, "No space for wait response");
            })?;

        debug!(seq = sequence, wait_idx = slot, "Async indication configured");

        if let Err(e) = self.send(sender, Some(&target), &envelope) {
            error!(seq = sequence, error = %e, "Async indication send failed");
            let mut waits = sender.waits.lock();
            let still_ours = waits
                .get(slot)
                .is_some_and(|row| !row.is_idle() && row.sequence == sequence);
            if still_ours {
                waits.free(slot);
            }
            return Err(e);
        }

        debug!(
            seq = sequence,
            from = %sender.name,
            to = %target.name,
            "Async indication sent"
        );
        Ok(envelope)
    }

    /// Answers an indication from `requester`.
    ///
    /// The envelope must carry the indication's sequence number (see
    /// [`Envelope::reply_to`]). The requester's wait row moves to
    /// `Received`; a missing row or unexpected state is logged and the
    /// response is sent anyway.
    ///
    /// # Errors
    ///
    /// - `NodeNotFound` - the requester is gone
    /// - `InvalidArgument` - the node or the requester belongs to another bus
    /// - any send error
    pub fn respond(
        &self,
        node: &Node,
        requester: &NodeRef,
        mut envelope: Envelope,
    ) -> Result<Envelope> {
        let sender = self.ensure_sender(node)?;
        let target = self.resolve_requester(requester)?;

        let sequence = envelope.sequence();
        debug!(from = %sender.name, to = %target.name, seq = sequence, "Sending response");

        envelope.stamp(
            MessageType::Response,
            sender.index,
            target.index,
            sequence,
            self.now(),
        );

        {
            let mut waits = target.waits.lock();
            match waits.find(sequence) {
                Some(idx) => {
                    waits.mark_received(idx);
                }
                None => {
                    self.inner.stats.record_unmatched_response();
                    warn!(
                        seq = sequence,
                        requester = %target.name,
                        "Wait item not found for response"
                    );
                }
            }
        }

        self.send(sender, Some(&target), &envelope)?;
        Ok(envelope)
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("config", &self.inner.config)
            .field("nodes", &self.node_count())
            .finish_non_exhaustive()
    }
}
