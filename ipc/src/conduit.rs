//! Conduit identifiers and endpoint geometry

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a conduit
///
/// A conduit is a bidirectional channel with exactly two endpoints and a
/// bounded FIFO queue in each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConduitId(Uuid);

impl ConduitId {
    /// Creates a new unique conduit ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID value
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConduitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConduitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conduit:{}", self.0)
    }
}

/// One of the two ends of a conduit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointSide {
    A,
    B,
}

impl EndpointSide {
    /// The other end of the conduit
    pub fn opposite(&self) -> EndpointSide {
        match self {
            EndpointSide::A => EndpointSide::B,
            EndpointSide::B => EndpointSide::A,
        }
    }

    /// Index into per-side storage
    pub fn index(&self) -> usize {
        match self {
            EndpointSide::A => 0,
            EndpointSide::B => 1,
        }
    }
}

impl fmt::Display for EndpointSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointSide::A => write!(f, "A"),
            EndpointSide::B => write!(f, "B"),
        }
    }
}
