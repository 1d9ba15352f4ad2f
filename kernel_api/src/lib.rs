//! # Kernel API
//!
//! The contract between the kernel core and everything running on top of
//! it: the trap-level operation surface, the error taxonomy, virtual
//! time, and boot-time description of the machine.
//!
//! ## Philosophy
//!
//! - **Every operation can fail recoverably**: results carry the error to
//!   the calling quantum instead of taking the kernel down.
//! - **Invariant violations are not errors**: they become a panic
//!   diagnostic and halt dispatch; no caller ever handles one.
//! - **Time is virtual**: the core advances a deterministic clock; wall
//!   time never leaks into kernel decisions.

pub mod boot;
pub mod error;
pub mod kernel;
pub mod time;

pub use boot::{BootInfo, MemoryMapKind, PhysSpan};
pub use error::{InvariantViolation, KernelError, PanicDiagnostic, Subsystem};
pub use kernel::{
    Completion, ExitNotification, ExitReason, IpcMode, KernelApi, QuantumDescriptor,
};
pub use time::{Duration, Instant};
