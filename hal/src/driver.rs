//! Device driver contract

use crate::interrupts::IrqLine;
use thiserror::Error;

/// Errors a driver can report
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("device not present")]
    NotPresent,

    #[error("attach failed: {0}")]
    AttachFailed(String),

    #[error("i/o error: {0}")]
    Io(String),
}

/// Lifecycle and data path of a device driver
///
/// Drivers run inside the kernel in hosted configurations; the contract
/// stays narrow so a driver can later move out of the core without
/// changing shape.
pub trait DeviceDriver {
    /// Human-readable driver name
    fn name(&self) -> &str;

    /// Checks whether the device is present
    fn probe(&mut self) -> Result<(), DriverError>;

    /// Brings the device up; called once after a successful probe
    fn attach(&mut self) -> Result<(), DriverError>;

    /// Services an interrupt from the device's line
    fn interrupt(&mut self, line: IrqLine);

    /// Reads up to `buf.len()` bytes, returning the count read
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DriverError>;

    /// Writes the buffer, returning the count written
    fn write(&mut self, buf: &[u8]) -> Result<usize, DriverError>;
}
