//! # Bus Errors
//!
//! Every registry, correlation and routing operation returns a typed result.
//! Resource exhaustion is an error the caller handles (backoff, retry), never
//! a panic.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Bounded resource that ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Resource {
    /// The registry slot table.
    NodeTable,
    /// A node's correlation (wait) table.
    WaitTable,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::NodeTable => write!(f, "node table"),
            Resource::WaitTable => write!(f, "wait table"),
        }
    }
}

/// Errors returned by bus operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Generic failure, including a mailbox push that failed for a reason
    /// other than being full.
    #[error("Bus operation failed: {0}")]
    Failure(String),

    /// No message arrived within the requested wait.
    #[error("Timed out waiting for a message")]
    Timeout,

    /// A fixed-capacity table is exhausted.
    #[error("No free entry in {resource} (capacity {capacity})")]
    NoMemory { resource: Resource, capacity: usize },

    /// Malformed input rejected at the boundary.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Name or slot lookup missed.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Unicast destination mailbox is saturated.
    #[error("Mailbox of node {node} is full")]
    QueueFull { node: String },

    /// A node with this name is already registered.
    #[error("Node name {0:?} is already registered")]
    DuplicateName(String),

    /// The bus or the node has been torn down.
    #[error("Bus or node is not initialized")]
    NotInitialized,
}

impl BusError {
    /// Status code for this error.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Failure(_) => Status::Fail,
            Self::Timeout => Status::Timeout,
            Self::NoMemory { .. } => Status::NoMemory,
            Self::InvalidArgument(_) | Self::NotInitialized => Status::InvalidArgument,
            Self::NodeNotFound(_) => Status::NodeNotFound,
            Self::QueueFull { .. } => Status::QueueFull,
            Self::DuplicateName(_) => Status::InvalidArgument,
        }
    }

    /// True for the errors a caller should treat as backpressure.
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::NoMemory { .. } | Self::QueueFull { .. })
    }
}

/// Flat status codes with stable numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Status {
    Success = 0,
    Fail,
    Timeout,
    NoMemory,
    InvalidArgument,
    NodeNotFound,
    /// Not an error: the receive path already dispatched the frame.
    HandledAsEvent,
    QueueFull,
}

impl<T> From<&Result<T>> for Status {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(e) => e.status(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
