//! Multi-node flows exercised through the public `ebus` API only.

pub mod delivery;
pub mod lifecycle;

use ebus::{Envelope, EventKind, Node, NodeEvent, NodeHandler};
use parking_lot::Mutex;
use std::sync::Arc;

/// Handler that records every event and, optionally, echoes indications.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<(EventKind, Envelope)>>>,
    echo: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every indication with the same event id and payload.
    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<(EventKind, Envelope)> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|(k, _)| *k == kind).count()
    }
}

impl NodeHandler for Recorder {
    fn handle(&self, node: &Node, event: NodeEvent<'_>) {
        self.events.lock().push((event.kind(), *event.message()));
        if let NodeEvent::IndicationReceived { message, requester } = event {
            if self.echo {
                if let Ok(reply) = Envelope::reply_to(message, message.payload()) {
                    let _ = node.respond(&requester, reply);
                }
            }
        }
    }
}
