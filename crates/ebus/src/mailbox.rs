//! # Mailbox
//!
//! Bounded FIFO of envelopes owned by one node, built on
//! `tokio::sync::mpsc`. Pushes never block: a saturated mailbox reports
//! `Full` immediately, which keeps pushes legal under the registry lock.

use crate::envelope::Envelope;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/// How long `receive` may wait for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Return immediately if the mailbox is empty.
    NoWait,
    /// Wait up to the given duration.
    For(Duration),
    /// Wait until a frame arrives.
    Forever,
}

impl Wait {
    /// Zero milliseconds means non-blocking.
    #[must_use]
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Wait::NoWait
        } else {
            Wait::For(Duration::from_millis(ms))
        }
    }
}

impl From<Duration> for Wait {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Wait::NoWait
        } else {
            Wait::For(duration)
        }
    }
}

/// Push failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushError {
    Full,
    Closed,
}

/// Pull failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PullError {
    Timeout,
    Closed,
}

/// Creates a mailbox pair with the given depth.
pub(crate) fn mailbox(depth: usize) -> (MailboxSender, Mailbox) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (MailboxSender { tx }, Mailbox { rx })
}

/// Sending side, held by the registry entry of the owning node.
#[derive(Debug, Clone)]
pub(crate) struct MailboxSender {
    tx: mpsc::Sender<Envelope>,
}

impl MailboxSender {
    pub(crate) fn try_push(&self, envelope: &Envelope) -> Result<(), PushError> {
        self.tx.try_send(*envelope).map_err(|e| match e {
            TrySendError::Full(_) => PushError::Full,
            TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Frames currently queued.
    pub(crate) fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub(crate) fn depth(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Receiving side, owned by the node.
#[derive(Debug)]
pub(crate) struct Mailbox {
    rx: mpsc::Receiver<Envelope>,
}

impl Mailbox {
    pub(crate) async fn pull(&mut self, wait: Wait) -> Result<Envelope, PullError> {
        match wait {
            Wait::NoWait => self.rx.try_recv().map_err(|e| match e {
                TryRecvError::Empty => PullError::Timeout,
                TryRecvError::Disconnected => PullError::Closed,
            }),
            Wait::For(duration) => match tokio::time::timeout(duration, self.rx.recv()).await {
                Ok(Some(envelope)) => Ok(envelope),
                Ok(None) => Err(PullError::Closed),
                Err(_) => Err(PullError::Timeout),
            },
            Wait::Forever => self.rx.recv().await.ok_or(PullError::Closed),
        }
    }

    /// Stops accepting frames; queued frames can still be pulled.
    pub(crate) fn close(&mut self) {
        self.rx.close();
    }
}
