//! # Kernel core
//!
//! The coordinating center of the system: execution, memory, and IPC
//! under one deterministic dispatch loop.
//!
//! Design premises:
//! - **Single-writer dispatch.** One trap enters the kernel at a time;
//!   every subsystem is a plain state machine with no interior locking.
//! - **Virtual time.** The clock only moves when a timer trap says so,
//!   which makes every scheduling and timeout decision replayable.
//! - **Two-tier failures.** Bad requests come back to the caller as
//!   recoverable errors; broken kernel invariants halt dispatch with a
//!   diagnostic instead of limping on.
//!
//! The entry point is [`Kernel`]: feed it a boot description, then feed
//! it traps.

pub mod compress;
pub mod conduit;
pub mod dispatch;
pub mod frame_alloc;
pub mod memory;
pub mod scheduler;
pub mod timer;

pub use conduit::{
    CancelledWait, CloseEffects, ConduitManager, DeferredSend, EnqueueOutcome, IpcEvent,
    PeerStatus, ReceiveOutcome,
};
pub use dispatch::{
    DispatchEvent, Kernel, KernelConfig, KernelState, Syscall, SyscallResult, Trap, TrapOrigin,
    TrapOutcome, WakeValue,
};
pub use frame_alloc::{FrameAllocConfig, FrameAllocator, FrameId};
pub use memory::{FaultResolution, MemoryEvent, MemoryManager, MemoryStats, RegionInfo};
pub use scheduler::{
    CoreId, NoAdjustment, PriorityAdjuster, QuantumState, ScheduleEvent, Scheduler,
    SchedulerConfig, WaitReason,
};
pub use timer::{Deadline, DeadlineWheel, VirtualTimer};
