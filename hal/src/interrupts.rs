//! Interrupt lines and handlers

use std::fmt;

/// A numbered interrupt line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IrqLine(pub u32);

impl fmt::Display for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "irq{}", self.0)
    }
}

/// Receives device interrupts routed by the kernel
pub trait InterruptHandler {
    fn handle_interrupt(&mut self, line: IrqLine);
}
