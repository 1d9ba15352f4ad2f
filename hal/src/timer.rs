//! Timer device seam

/// Source of periodic ticks driving the kernel's virtual clock
pub trait TimerDevice {
    /// Returns the number of ticks elapsed since the last poll
    ///
    /// Polling drains the device; two consecutive polls with no elapsed
    /// ticks return zero.
    fn poll_ticks(&mut self) -> u64;
}
