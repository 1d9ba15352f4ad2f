//! Virtual timer device and deadline tracking

use core_types::QuantumId;
use hal::TimerDevice;
use ipc::ConduitId;
use kernel_api::Instant;
use std::collections::{BTreeMap, HashMap};

/// Deterministic tick source
///
/// The host (or a test) advances it explicitly; polling drains it. No
/// wall-clock time is involved anywhere.
#[derive(Debug, Default)]
pub struct VirtualTimer {
    pending: u64,
}

impl VirtualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues ticks for the next poll
    pub fn advance(&mut self, ticks: u64) {
        self.pending = self.pending.saturating_add(ticks);
    }
}

impl TimerDevice for VirtualTimer {
    fn poll_ticks(&mut self) -> u64 {
        std::mem::take(&mut self.pending)
    }
}

/// A deadline registered for a parked IPC operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub quantum: QuantumId,
    pub conduit: ConduitId,
}

/// Ordered set of pending deadlines
///
/// One deadline per quantum: a quantum parks on at most one operation
/// at a time. The tiebreaker counter keeps expiry deterministic when
/// deadlines coincide.
#[derive(Debug, Default)]
pub struct DeadlineWheel {
    ordered: BTreeMap<(Instant, u64), Deadline>,
    by_quantum: HashMap<QuantumId, (Instant, u64)>,
    next_tiebreak: u64,
}

impl DeadlineWheel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a deadline, replacing any existing one for the quantum
    pub fn register(&mut self, quantum: QuantumId, conduit: ConduitId, deadline: Instant) {
        self.cancel(quantum);
        let key = (deadline, self.next_tiebreak);
        self.next_tiebreak += 1;
        self.ordered.insert(key, Deadline { quantum, conduit });
        self.by_quantum.insert(quantum, key);
    }

    /// Drops a quantum's deadline, if registered
    pub fn cancel(&mut self, quantum: QuantumId) -> bool {
        match self.by_quantum.remove(&quantum) {
            Some(key) => {
                self.ordered.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Removes and returns every deadline at or before `now`
    pub fn expire(&mut self, now: Instant) -> Vec<Deadline> {
        let mut expired = Vec::new();
        while let Some((&key, _)) = self.ordered.iter().next() {
            if key.0 > now {
                break;
            }
            if let Some(deadline) = self.ordered.remove(&key) {
                self.by_quantum.remove(&deadline.quantum);
                expired.push(deadline);
            }
        }
        expired
    }

    pub fn pending(&self) -> usize {
        self.ordered.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_timer_drains_on_poll() {
        let mut timer = VirtualTimer::new();
        timer.advance(3);
        timer.advance(2);
        assert_eq!(timer.poll_ticks(), 5);
        assert_eq!(timer.poll_ticks(), 0);
    }

    #[test]
    fn test_expiry_order_and_threshold() {
        let mut wheel = DeadlineWheel::new();
        let (a, b, c) = (QuantumId::new(), QuantumId::new(), QuantumId::new());
        let conduit = ConduitId::new();
        wheel.register(b, conduit, Instant::from_nanos(200));
        wheel.register(a, conduit, Instant::from_nanos(100));
        wheel.register(c, conduit, Instant::from_nanos(300));

        let expired = wheel.expire(Instant::from_nanos(250));
        let order: Vec<QuantumId> = expired.iter().map(|d| d.quantum).collect();
        assert_eq!(order, vec![a, b]);
        assert_eq!(wheel.pending(), 1);
    }

    #[test]
    fn test_cancel_prevents_expiry() {
        let mut wheel = DeadlineWheel::new();
        let q = QuantumId::new();
        wheel.register(q, ConduitId::new(), Instant::from_nanos(10));
        assert!(wheel.cancel(q));
        assert!(!wheel.cancel(q));
        assert!(wheel.expire(Instant::from_nanos(100)).is_empty());
    }

    #[test]
    fn test_reregister_replaces_deadline() {
        let mut wheel = DeadlineWheel::new();
        let q = QuantumId::new();
        let conduit = ConduitId::new();
        wheel.register(q, conduit, Instant::from_nanos(10));
        wheel.register(q, conduit, Instant::from_nanos(500));
        assert!(wheel.expire(Instant::from_nanos(100)).is_empty());
        assert_eq!(wheel.expire(Instant::from_nanos(500)).len(), 1);
    }
}
