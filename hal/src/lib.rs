//! # Hardware Abstraction Layer
//!
//! The thin seam between the kernel core and whatever provides ticks and
//! interrupts. In hosted runs these traits are backed by deterministic
//! virtual devices; on real hardware they would wrap the platform timer
//! and interrupt controller.

pub mod driver;
pub mod interrupts;
pub mod timer;

pub use driver::{DeviceDriver, DriverError};
pub use interrupts::{InterruptHandler, IrqLine};
pub use timer::TimerDevice;
