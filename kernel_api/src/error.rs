//! Kernel error taxonomy
//!
//! Two tiers: [`KernelError`] values are recoverable and delivered to
//! the quantum whose request failed; an [`InvariantViolation`] is never
//! delivered anywhere, it becomes a [`PanicDiagnostic`] and halts
//! dispatch.

use crate::time::Instant;
use core_types::{MemoryError, QuantumId};
use ipc::ConduitId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Recoverable failures surfaced to the requesting quantum
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("operation would block")]
    WouldBlock,

    #[error("conduit {0} is closed at the far end")]
    ConduitClosed(ConduitId),

    #[error("conduit {0} has no remaining endpoints")]
    ConduitOrphaned(ConduitId),

    #[error("conduit {0} queue is full")]
    ConduitFull(ConduitId),

    #[error("{1} is not connected to conduit {0}")]
    NotConnected(ConduitId, QuantumId),

    #[error("operation timed out")]
    Timeout,

    #[error("no such quantum: {0}")]
    NoSuchQuantum(QuantumId),

    #[error("kernel is not in the Running state")]
    NotRunning,

    #[error("kernel has panicked: {0}")]
    Panicked(PanicDiagnostic),
}

/// Subsystem that detected a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subsystem {
    Memory,
    Scheduler,
    Ipc,
    Dispatch,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subsystem::Memory => write!(f, "memory"),
            Subsystem::Scheduler => write!(f, "scheduler"),
            Subsystem::Ipc => write!(f, "ipc"),
            Subsystem::Dispatch => write!(f, "dispatch"),
        }
    }
}

/// Diagnostic captured when the kernel enters the Panic state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanicDiagnostic {
    pub subsystem: Subsystem,
    pub detail: String,
    pub timestamp: Instant,
}

impl fmt::Display for PanicDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "panic in {} at {}: {}",
            self.subsystem, self.timestamp, self.detail
        )
    }
}

/// A broken kernel invariant detected by a subsystem
///
/// Subsystems report these without knowing the current time; dispatch
/// stamps the diagnostic when it halts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub subsystem: Subsystem,
    pub detail: String,
}

impl InvariantViolation {
    pub fn new(subsystem: Subsystem, detail: impl Into<String>) -> Self {
        Self {
            subsystem,
            detail: detail.into(),
        }
    }

    /// Stamps the violation into a panic diagnostic
    pub fn into_diagnostic(self, now: Instant) -> PanicDiagnostic {
        PanicDiagnostic {
            subsystem: self.subsystem,
            detail: self.detail,
            timestamp: now,
        }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invariant violated in {}: {}", self.subsystem, self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::RegionId;

    #[test]
    fn test_memory_error_converts() {
        let err: KernelError = MemoryError::UnknownRegion(RegionId::new()).into();
        assert!(matches!(err, KernelError::Memory(_)));
    }

    #[test]
    fn test_violation_stamped_at_halt_time() {
        let violation = InvariantViolation::new(Subsystem::Memory, "double free of region");
        let diag = violation.into_diagnostic(Instant::from_nanos(42));
        assert_eq!(diag.subsystem, Subsystem::Memory);
        assert_eq!(diag.timestamp, Instant::from_nanos(42));
        assert!(diag.to_string().contains("double free"));
    }

    #[test]
    fn test_error_display() {
        let conduit = ConduitId::new();
        let err = KernelError::ConduitFull(conduit);
        assert!(err.to_string().contains("queue is full"));
    }
}
