//! Unique identifiers for schedulable entities

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a quantum
///
/// A quantum is a schedulable unit of execution tagged with the binary
/// interface convention it follows. Identifiers are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuantumId(Uuid);

impl QuantumId {
    /// Creates a new random quantum ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a quantum ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for QuantumId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QuantumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quantum({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantum_id_unique() {
        let id1 = QuantumId::new();
        let id2 = QuantumId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_quantum_id_from_uuid() {
        let uuid = Uuid::new_v4();
        let id = QuantumId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn test_quantum_id_display() {
        let id = QuantumId::new();
        let display = format!("{}", id);
        assert!(display.starts_with("Quantum("));
    }

    #[test]
    fn test_quantum_id_serde_round_trip() {
        let id = QuantumId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: QuantumId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
