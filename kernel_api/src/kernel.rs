//! The kernel operation surface
//!
//! [`KernelApi`] is the trap-level contract: every operation a running
//! quantum can request. Implementations decide scheduling and blocking;
//! the trait only fixes the shapes and the error taxonomy.

use crate::error::KernelError;
use crate::time::Instant;
use core_types::{
    AbiTag, BackingKind, MemoryPerms, QuantumId, RegionId, VirtRange,
};
use ipc::{ConduitId, Message};
use serde::{Deserialize, Serialize};

/// Everything needed to create a quantum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantumDescriptor {
    pub name: String,
    pub entry: u64,
    pub abi: AbiTag,
    /// Base scheduling priority, 0 (lowest) to 31 (highest)
    pub base_priority: u8,
    /// Stack size in pages, mapped read-write below the layout ceiling
    pub stack_pages: u64,
}

impl QuantumDescriptor {
    pub fn new(name: impl Into<String>, entry: u64, abi: AbiTag) -> Self {
        Self {
            name: name.into(),
            entry,
            abi,
            base_priority: 16,
            stack_pages: 4,
        }
    }

    pub fn with_priority(mut self, base_priority: u8) -> Self {
        self.base_priority = base_priority;
        self
    }

    pub fn with_stack_pages(mut self, stack_pages: u64) -> Self {
        self.stack_pages = stack_pages;
        self
    }
}

/// Why a quantum stopped executing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Voluntary exit
    Normal,
    /// Terminated by an unrecoverable fault
    Fault(String),
    /// Terminated by another quantum or the kernel
    Killed,
}

/// Delivered when a quantum terminates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitNotification {
    pub quantum: QuantumId,
    pub reason: ExitReason,
    pub timestamp: Instant,
}

/// Blocking discipline for a send or receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpcMode {
    /// Park the caller until the operation can complete
    Blocking,
    /// Fail immediately with `WouldBlock` instead of parking
    NonBlocking,
}

/// Outcome of an operation that may park the caller
///
/// `Blocked` means the caller has been descheduled; the eventual result
/// arrives out of band when the kernel wakes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T> {
    Ready(T),
    Blocked,
}

impl<T> Completion<T> {
    /// Returns the ready value, or `None` if the caller was parked
    pub fn ready(self) -> Option<T> {
        match self {
            Completion::Ready(value) => Some(value),
            Completion::Blocked => None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Completion::Blocked)
    }
}

/// Trap-level operations available to a running quantum
pub trait KernelApi {
    /// Creates a quantum in a fresh address space and makes it Ready
    fn spawn(&mut self, descriptor: QuantumDescriptor) -> Result<QuantumId, KernelError>;

    /// Voluntarily yields the remainder of the caller's time slice
    fn yield_now(&mut self, caller: QuantumId) -> Result<(), KernelError>;

    /// Maps a region into the caller's address space
    fn map(
        &mut self,
        caller: QuantumId,
        range: VirtRange,
        perms: MemoryPerms,
        backing: BackingKind,
    ) -> Result<RegionId, KernelError>;

    /// Unmaps a region from the caller's address space
    fn unmap(&mut self, caller: QuantumId, region: RegionId) -> Result<(), KernelError>;

    /// Creates a conduit with both endpoints unbound
    fn conduit_create(&mut self) -> Result<ConduitId, KernelError>;

    /// Binds a quantum to the first free endpoint of a conduit
    fn conduit_connect(
        &mut self,
        conduit: ConduitId,
        quantum: QuantumId,
    ) -> Result<(), KernelError>;

    /// Sends bytes toward the peer endpoint
    ///
    /// A `deadline` bounds how long a blocking caller may stay parked;
    /// expiry wakes it with [`KernelError::Timeout`].
    fn send(
        &mut self,
        caller: QuantumId,
        conduit: ConduitId,
        tag: u32,
        bytes: Vec<u8>,
        mode: IpcMode,
        deadline: Option<Instant>,
    ) -> Result<Completion<()>, KernelError>;

    /// Receives the next message queued toward the caller's endpoint
    fn receive(
        &mut self,
        caller: QuantumId,
        conduit: ConduitId,
        mode: IpcMode,
        deadline: Option<Instant>,
    ) -> Result<Completion<Message>, KernelError>;

    /// Terminates the caller and releases everything it owns
    fn exit(&mut self, caller: QuantumId, reason: ExitReason) -> Result<(), KernelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let desc = QuantumDescriptor::new("init", 0x40_0000, AbiTag::Native64)
            .with_priority(24)
            .with_stack_pages(8);
        assert_eq!(desc.base_priority, 24);
        assert_eq!(desc.stack_pages, 8);
        assert_eq!(desc.name, "init");
    }

    #[test]
    fn test_descriptor_defaults() {
        let desc = QuantumDescriptor::new("worker", 0, AbiTag::Portable);
        assert_eq!(desc.base_priority, 16);
        assert_eq!(desc.stack_pages, 4);
    }

    #[test]
    fn test_completion_accessors() {
        let ready: Completion<u32> = Completion::Ready(9);
        assert_eq!(ready.ready(), Some(9));
        let blocked: Completion<u32> = Completion::Blocked;
        assert!(blocked.is_blocked());
        assert_eq!(blocked.ready(), None);
    }

    #[test]
    fn test_exit_reason_serde_round_trip() {
        let reason = ExitReason::Fault("segmentation fault".into());
        let json = serde_json::to_string(&reason).unwrap();
        let back: ExitReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reason);
    }
}
