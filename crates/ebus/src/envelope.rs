//! # Message Envelope
//!
//! Fixed-size frame that travels through mailboxes by value. The bus stamps
//! type, addressing, sequence number and timestamp; the application supplies
//! the event id and payload.

use crate::error::{BusError, Result};
use crate::time::Tick;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload capacity of one envelope, in bytes.
pub const MAX_PAYLOAD_LEN: usize = 8;

/// Destination index meaning "every other registered node".
pub const BROADCAST_INDEX: u8 = 0xFF;

/// Slot index of a node in the registry.
pub type SlotIndex = u8;

/// Kind of message carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Delivered to every registered node except the sender.
    Broadcast = 0,
    /// Unicast, no response expected.
    Notification = 1,
    /// Unicast request; the destination is expected to respond.
    Indication = 2,
    /// Answer to an indication, carrying its sequence number.
    Response = 3,
}

impl MessageType {
    #[must_use]
    pub fn is_unicast(self) -> bool {
        !matches!(self, MessageType::Broadcast)
    }
}

impl TryFrom<u8> for MessageType {
    type Error = BusError;

    fn try_from(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(MessageType::Broadcast),
            1 => Ok(MessageType::Notification),
            2 => Ok(MessageType::Indication),
            3 => Ok(MessageType::Response),
            other => Err(BusError::InvalidArgument(format!(
                "unknown message type {other}"
            ))),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Broadcast => "broadcast",
            MessageType::Notification => "notification",
            MessageType::Indication => "indication",
            MessageType::Response => "response",
        };
        f.write_str(name)
    }
}

/// One message frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    kind: MessageType,
    source: SlotIndex,
    destination: SlotIndex,
    timestamp: Tick,
    sequence: u16,
    event_id: u16,
    len: u8,
    data: [u8; MAX_PAYLOAD_LEN],
}

impl Envelope {
    /// Creates an unstamped envelope.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `payload` exceeds [`MAX_PAYLOAD_LEN`].
    pub fn new(event_id: u16, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(BusError::InvalidArgument(format!(
                "payload of {} bytes exceeds {MAX_PAYLOAD_LEN}",
                payload.len()
            )));
        }
        let mut data = [0u8; MAX_PAYLOAD_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            kind: MessageType::Notification,
            source: 0,
            destination: 0,
            timestamp: 0,
            sequence: 0,
            event_id,
            // Bounded by MAX_PAYLOAD_LEN above.
            len: payload.len() as u8,
            data,
        })
    }

    /// Creates an envelope with no payload.
    #[must_use]
    pub fn event(event_id: u16) -> Self {
        Self {
            kind: MessageType::Notification,
            source: 0,
            destination: 0,
            timestamp: 0,
            sequence: 0,
            event_id,
            len: 0,
            data: [0u8; MAX_PAYLOAD_LEN],
        }
    }

    /// Builds the answer to `indication`: same event id and sequence number.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `payload` is too long.
    pub fn reply_to(indication: &Envelope, payload: &[u8]) -> Result<Self> {
        let mut reply = Self::new(indication.event_id, payload)?;
        reply.sequence = indication.sequence;
        Ok(reply)
    }

    /// Overrides the sequence number used by `respond`.
    #[must_use]
    pub fn with_sequence(mut self, sequence: u16) -> Self {
        self.sequence = sequence;
        self
    }

    pub(crate) fn stamp(
        &mut self,
        kind: MessageType,
        source: SlotIndex,
        destination: SlotIndex,
        sequence: u16,
        timestamp: Tick,
    ) {
        self.kind = kind;
        self.source = source;
        self.destination = destination;
        self.sequence = sequence;
        self.timestamp = timestamp;
    }

    #[must_use]
    pub fn kind(&self) -> MessageType {
        self.kind
    }

    #[must_use]
    pub fn source(&self) -> SlotIndex {
        self.source
    }

    #[must_use]
    pub fn destination(&self) -> SlotIndex {
        self.destination
    }

    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST_INDEX
    }

    #[must_use]
    pub fn timestamp(&self) -> Tick {
        self.timestamp
    }

    #[must_use]
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    #[must_use]
    pub fn event_id(&self) -> u16 {
        self.event_id
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len).min(MAX_PAYLOAD_LEN)]
    }

    /// Checks that the addressing agrees with the message type.
    pub(crate) fn validate(&self) -> Result<()> {
        if usize::from(self.len) > MAX_PAYLOAD_LEN {
            return Err(BusError::InvalidArgument(format!(
                "payload length {} exceeds {MAX_PAYLOAD_LEN}",
                self.len
            )));
        }
        match (self.kind, self.is_broadcast()) {
            (MessageType::Broadcast, false) => Err(BusError::InvalidArgument(format!(
                "broadcast addressed to slot {}",
                self.destination
            ))),
            (kind, true) if kind.is_unicast() => Err(BusError::InvalidArgument(format!(
                "{kind} addressed to the broadcast sentinel"
            ))),
            _ => Ok(()),
        }
    }
}
