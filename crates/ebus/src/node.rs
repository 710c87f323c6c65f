//! # Nodes
//!
//! A [`Node`] is the owning handle of one registered participant: it holds
//! the receiving end of the mailbox and the handler, and is the only way to
//! receive. A [`NodeRef`] is a non-owning handle used to address a peer, for
//! example the requester of an indication.
//!
//! Dropping a `Node` deregisters it.

use crate::bus::Bus;
use crate::correlation::{CorrelationTable, WaitItem};
use crate::envelope::{Envelope, MessageType, SlotIndex};
use crate::error::{BusError, Result, Status};
use crate::mailbox::{Mailbox, MailboxSender, PullError, Wait};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Which of the three handler events fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Application-level delivery of a broadcast or notification.
    Received,
    /// An indication arrived; the handler should respond.
    IndicationReceived,
    /// A response to one of this node's indications arrived.
    IndicationAcknowledged,
}

/// Event passed to a [`NodeHandler`].
#[derive(Debug)]
pub enum NodeEvent<'a> {
    /// Broadcast or notification, handed over by [`Node::dispatch`].
    Received(&'a Envelope),

    /// Indication from `requester`; answer with [`Node::respond`].
    IndicationReceived {
        message: &'a Envelope,
        requester: NodeRef,
    },

    /// Response to an indication this node sent.
    IndicationAcknowledged(&'a Envelope),
}

impl NodeEvent<'_> {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            NodeEvent::Received(_) => EventKind::Received,
            NodeEvent::IndicationReceived { .. } => EventKind::IndicationReceived,
            NodeEvent::IndicationAcknowledged(_) => EventKind::IndicationAcknowledged,
        }
    }

    #[must_use]
    pub fn message(&self) -> &Envelope {
        match self {
            NodeEvent::Received(message)
            | NodeEvent::IndicationReceived { message, .. }
            | NodeEvent::IndicationAcknowledged(message) => message,
        }
    }
}

/// Per-node event callback.
///
/// Invoked on the receiving node's task with no bus or node lock held, so it
/// may call any bus verb, including [`Node::respond`].
pub trait NodeHandler: Send + Sync {
    fn handle(&self, node: &Node, event: NodeEvent<'_>);
}

impl<F> NodeHandler for F
where
    F: Fn(&Node, NodeEvent<'_>) + Send + Sync,
{
    fn handle(&self, node: &Node, event: NodeEvent<'_>) {
        self(node, event);
    }
}

/// Wraps a closure as a handler, pinning its signature for inference.
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(&Node, NodeEvent<'_>) + Send + Sync,
{
    f
}

/// Result of a successful receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// Broadcast or notification for the caller's own dispatch.
    Message(Envelope),
    /// Indication or response already dispatched to the handler.
    Handled(Envelope),
}

impl Received {
    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        match self {
            Received::Message(envelope) | Received::Handled(envelope) => envelope,
        }
    }

    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Received::Message(_) => Status::Success,
            Received::Handled(_) => Status::HandledAsEvent,
        }
    }
}

/// State of a node visible to the rest of the bus.
pub(crate) struct NodeShared {
    pub(crate) name: String,
    pub(crate) index: SlotIndex,
    initialized: AtomicBool,
    /// Flips to `true` once, when the node is invalidated; wakes receivers.
    invalidated: watch::Sender<bool>,
    pub(crate) mailbox: MailboxSender,
    /// Per-node lock. Never take the registry lock while holding it.
    pub(crate) waits: Mutex<CorrelationTable>,
}

impl NodeShared {
    pub(crate) fn new(
        name: &str,
        index: SlotIndex,
        mailbox: MailboxSender,
        max_waits: usize,
    ) -> Self {
        let (invalidated, _) = watch::channel(false);
        Self {
            name: name.to_string(),
            index,
            initialized: AtomicBool::new(true),
            invalidated,
            mailbox,
            waits: Mutex::new(CorrelationTable::new(max_waits)),
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Clears the flag and wakes any pending receive; returns whether the
    /// flag was set.
    pub(crate) fn invalidate(&self) -> bool {
        let was_set = self.initialized.swap(false, Ordering::AcqRel);
        if was_set {
            self.invalidated.send_replace(true);
        }
        was_set
    }

    fn subscribe_invalidation(&self) -> watch::Receiver<bool> {
        self.invalidated.subscribe()
    }
}

impl fmt::Debug for NodeShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeShared")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

/// Non-owning handle to a registered node.
///
/// Stays valid to hold after the node is gone; it simply stops resolving.
#[derive(Clone)]
pub struct NodeRef {
    name: Arc<str>,
    index: SlotIndex,
    shared: Weak<NodeShared>,
}

impl NodeRef {
    pub(crate) fn new(shared: &Arc<NodeShared>) -> Self {
        Self {
            name: Arc::from(shared.name.as_str()),
            index: shared.index,
            shared: Arc::downgrade(shared),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn index(&self) -> SlotIndex {
        self.index
    }

    /// True while the node is still registered.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.upgrade().is_some()
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<NodeShared>> {
        self.shared.upgrade().filter(|node| node.is_initialized())
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for NodeRef {}

/// Owning handle of a registered node.
pub struct Node {
    bus: Bus,
    shared: Arc<NodeShared>,
    mailbox: Mailbox,
    invalidated: watch::Receiver<bool>,
    handler: Arc<dyn NodeHandler>,
}

impl Node {
    pub(crate) fn new(
        bus: Bus,
        shared: Arc<NodeShared>,
        mailbox: Mailbox,
        handler: Arc<dyn NodeHandler>,
    ) -> Self {
        let invalidated = shared.subscribe_invalidation();
        Self {
            bus,
            shared,
            mailbox,
            invalidated,
            handler,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<NodeShared> {
        &self.shared
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub fn index(&self) -> SlotIndex {
        self.shared.index
    }

    /// False once deregistered or after bus shutdown.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.shared.is_initialized()
    }

    /// Non-owning handle to this node.
    #[must_use]
    pub fn handle(&self) -> NodeRef {
        NodeRef::new(&self.shared)
    }

    #[must_use]
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// See [`Bus::broadcast`].
    pub fn broadcast(&self, envelope: Envelope) -> Result<Envelope> {
        self.bus.broadcast(self, envelope)
    }

    /// See [`Bus::notify`].
    pub fn notify(&self, destination: &str, envelope: Envelope) -> Result<Envelope> {
        self.bus.notify(self, destination, envelope)
    }

    /// See [`Bus::indicate_async`].
    pub fn indicate_async(&self, destination: &str, envelope: Envelope) -> Result<Envelope> {
        self.bus.indicate_async(self, destination, envelope)
    }

    /// See [`Bus::respond`].
    pub fn respond(&self, requester: &NodeRef, envelope: Envelope) -> Result<Envelope> {
        self.bus.respond(self, requester, envelope)
    }

    /// Pulls one frame and dispatches it by type.
    ///
    /// Indications and responses go to the handler and come back as
    /// [`Received::Handled`]; broadcasts and notifications come back as
    /// [`Received::Message`] for the caller.
    ///
    /// # Errors
    ///
    /// - `Timeout` - nothing arrived within `wait`
    /// - `Failure` - the mailbox is closed
    /// - `NotInitialized` - the node was deregistered or the bus shut down,
    ///   including while this call was waiting
    pub async fn receive(&mut self, wait: Wait) -> Result<Received> {
        if !self.is_initialized() {
            error!(node = %self.shared.name, "Receive on uninitialized node");
            return Err(BusError::NotInitialized);
        }

        debug!(node = %self.shared.name, ?wait, "Waiting for message");

        let pulled = tokio::select! {
            biased;
            _ = self.invalidated.wait_for(|gone| *gone) => {
                debug!(node = %self.shared.name, "Receive interrupted by invalidation");
                return Err(BusError::NotInitialized);
            }
            pulled = self.mailbox.pull(wait) => pulled,
        };

        let envelope = match pulled {
            Ok(envelope) => envelope,
            Err(PullError::Timeout) => {
                debug!(node = %self.shared.name, "Message receive timeout");
                return Err(BusError::Timeout);
            }
            Err(PullError::Closed) => {
                error!(node = %self.shared.name, "Mailbox closed");
                return Err(BusError::Failure(format!(
                    "mailbox of node {} is closed",
                    self.shared.name
                )));
            }
        };

        debug!(
            node = %self.shared.name,
            kind = %envelope.kind(),
            seq = envelope.sequence(),
            src = envelope.source(),
            dst = envelope.destination(),
            "Message received"
        );

        let handler = Arc::clone(&self.handler);
        match envelope.kind() {
            MessageType::Indication => {
                match self.bus.find_by_index(envelope.source()) {
                    Some(requester) => handler.handle(
                        self,
                        NodeEvent::IndicationReceived {
                            message: &envelope,
                            requester,
                        },
                    ),
                    None => warn!(
                        node = %self.shared.name,
                        src = envelope.source(),
                        seq = envelope.sequence(),
                        "Source node not found for indication"
                    ),
                }
                Ok(Received::Handled(envelope))
            }
            MessageType::Response => {
                handler.handle(self, NodeEvent::IndicationAcknowledged(&envelope));
                self.complete_wait(&envelope);
                Ok(Received::Handled(envelope))
            }
            MessageType::Broadcast | MessageType::Notification => Ok(Received::Message(envelope)),
        }
    }

    /// Non-blocking [`receive`](Self::receive).
    pub async fn try_receive(&mut self) -> Result<Received> {
        self.receive(Wait::NoWait).await
    }

    /// Hands a broadcast or notification to the handler as `Received`.
    pub fn dispatch(&self, envelope: &Envelope) {
        let handler = Arc::clone(&self.handler);
        handler.handle(self, NodeEvent::Received(envelope));
    }

    /// Drains the mailbox without waiting, dispatching every frame.
    ///
    /// Returns the number of frames consumed.
    pub async fn drain(&mut self) -> Result<usize> {
        let mut consumed = 0;
        loop {
            match self.try_receive().await {
                Ok(Received::Message(envelope)) => {
                    self.dispatch(&envelope);
                    consumed += 1;
                }
                Ok(Received::Handled(_)) => consumed += 1,
                Err(BusError::Timeout) => return Ok(consumed),
                Err(e) => return Err(e),
            }
        }
    }

    /// Frees the wait row matching a dispatched response.
    fn complete_wait(&self, envelope: &Envelope) {
        let mut waits = self.shared.waits.lock();
        match waits.find(envelope.sequence()) {
            Some(idx) => {
                debug!(
                    node = %self.shared.name,
                    seq = envelope.sequence(),
                    src = envelope.source(),
                    "Processing response"
                );
                waits.free(idx);
            }
            None => warn!(
                node = %self.shared.name,
                seq = envelope.sequence(),
                "Response not in wait list"
            ),
        }
    }

    /// Outstanding indications of this node.
    #[must_use]
    pub fn pending_waits(&self) -> Vec<WaitItem> {
        self.shared
            .waits
            .lock()
            .active()
            .map(|(_, row)| *row)
            .collect()
    }

    /// Outstanding indications older than the configured wait timeout.
    ///
    /// Nothing is freed; pass the sequence numbers to
    /// [`release_wait`](Self::release_wait) to give up on them.
    #[must_use]
    pub fn stale_waits(&self) -> Vec<WaitItem> {
        let now = self.bus.now();
        let max_age = u64::try_from(self.bus.config().default_wait_timeout.as_millis())
            .unwrap_or(u64::MAX);
        self.shared.waits.lock().stale(now, max_age)
    }

    /// Gives up on an outstanding indication. Returns whether a row was freed.
    pub fn release_wait(&self, sequence: u16) -> bool {
        let mut waits = self.shared.waits.lock();
        match waits.find(sequence) {
            Some(idx) => waits.free(idx).is_some(),
            None => false,
        }
    }

    /// Removes the node from the bus and releases its mailbox and table.
    pub fn deregister(mut self) {
        self.bus.release(&self.shared);
        self.mailbox.close();
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.shared.is_initialized() {
            self.bus.release(&self.shared);
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.shared.name)
            .field("index", &self.shared.index)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
