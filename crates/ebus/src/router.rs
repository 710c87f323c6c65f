//! # Router
//!
//! Delivers a stamped envelope to its target mailbox(es).
//!
//! | Type | Targets | Full mailbox |
//! |------|---------|--------------|
//! | Broadcast | every initialized node except the sender | logged, skipped |
//! | Notification / Indication / Response | destination slot | `QueueFull` |
//!
//! Broadcast is best effort so one slow consumer cannot fail delivery to the
//! rest; unicast reports every failure because the caller may be waiting on
//! a response.

use crate::bus::Bus;
use crate::envelope::{Envelope, MessageType};
use crate::error::{BusError, Result};
use crate::mailbox::PushError;
use crate::node::NodeShared;
use std::sync::Arc;
use tracing::{debug, error, warn};

impl Bus {
    /// `target` is the node the caller resolved for a unicast; the frame is
    /// only pushed if that node still occupies the destination slot.
    pub(crate) fn send(
        &self,
        sender: &Arc<NodeShared>,
        target: Option<&Arc<NodeShared>>,
        envelope: &Envelope,
    ) -> Result<()> {
        if !sender.is_initialized() {
            error!(node = %sender.name, "Message send from uninitialized node");
            return Err(BusError::NotInitialized);
        }
        envelope.validate()?;

        debug!(
            kind = %envelope.kind(),
            src = envelope.source(),
            dst = envelope.destination(),
            seq = envelope.sequence(),
            "Sending message"
        );

        match envelope.kind() {
            MessageType::Broadcast => {
                self.fan_out(sender, envelope);
                Ok(())
            }
            MessageType::Notification | MessageType::Indication | MessageType::Response => {
                self.unicast(sender, target, envelope)
            }
        }
    }

    /// Pushes to every other node under the registry lock. Returns the number
    /// of mailboxes that accepted the frame.
    fn fan_out(&self, sender: &Arc<NodeShared>, envelope: &Envelope) -> usize {
        let mut delivered = 0;
        let mut dropped = 0;
        {
            let registry = self.inner.registry.lock();
            let targets = registry
                .occupied()
                .filter(|target| target.is_initialized() && !Arc::ptr_eq(target, sender));
            for target in targets {
                match target.mailbox.try_push(envelope) {
                    Ok(()) => {
                        delivered += 1;
                        debug!(to = %target.name, "Broadcast sent to node");
                    }
                    Err(PushError::Full) => {
                        dropped += 1;
                        warn!(to = %target.name, "Node mailbox full, drop broadcast");
                    }
                    Err(PushError::Closed) => {
                        dropped += 1;
                        error!(to = %target.name, "Send broadcast to node failed: mailbox closed");
                    }
                }
            }
        }

        self.inner.stats.record_broadcast(delivered, dropped);
        debug!(
            src = envelope.source(),
            seq = envelope.sequence(),
            sent_to = delivered,
            dropped,
            "Broadcast completed"
        );
        delivered
    }

    fn unicast(
        &self,
        sender: &NodeShared,
        intended: Option<&Arc<NodeShared>>,
        envelope: &Envelope,
    ) -> Result<()> {
        let target = self
            .inner
            .registry
            .lock()
            .find_by_index(envelope.destination())
            .filter(|current| intended.map_or(true, |node| Arc::ptr_eq(current, node)))
            .cloned();

        let Some(target) = target else {
            error!(dst = envelope.destination(), "Target node not found");
            return Err(BusError::NodeNotFound(format!(
                "slot {}",
                envelope.destination()
            )));
        };

        match target.mailbox.try_push(envelope) {
            Ok(()) => {
                self.inner.stats.record_delivered();
                debug!(
                    kind = %envelope.kind(),
                    from = %sender.name,
                    to = %target.name,
                    seq = envelope.sequence(),
                    evt = envelope.event_id(),
                    len = envelope.payload().len(),
                    "Message sent"
                );
                Ok(())
            }
            Err(PushError::Full) => {
                self.inner.stats.record_rejected();
                error!(to = %target.name, "Target node mailbox full, drop message");
                Err(BusError::QueueFull {
                    node: target.name.clone(),
                })
            }
            Err(PushError::Closed) => {
                self.inner.stats.record_rejected();
                error!(to = %target.name, "Send to node failed: mailbox closed");
                Err(BusError::Failure(format!(
                    "mailbox of node {} is closed",
                    target.name
                )))
            }
        }
    }
}
