//! Virtual time
//!
//! The kernel core runs on a deterministic clock advanced by timer
//! ticks. Both types are plain nanosecond counters so every scheduling
//! and timeout decision replays identically from the same trap sequence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// A point on the kernel's virtual timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Instant {
    nanos: u64,
}

impl Instant {
    /// The origin of the timeline, before any tick has been processed
    pub const ZERO: Instant = Instant { nanos: 0 };

    /// Creates an instant from nanoseconds since the origin
    pub fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Nanoseconds since the origin
    pub fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Duration elapsed since an earlier instant, saturating at zero
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(earlier.nanos))
    }

    /// Adds a duration, returning `None` on overflow
    pub fn checked_add(&self, duration: Duration) -> Option<Instant> {
        self.nanos.checked_add(duration.nanos).map(|nanos| Instant { nanos })
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant {
            nanos: self.nanos.saturating_add(rhs.nanos),
        }
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.nanos = self.nanos.saturating_add(rhs.nanos);
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        self.duration_since(rhs)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t+{}ns", self.nanos)
    }
}

/// A span of virtual time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Duration {
    nanos: u64,
}

impl Duration {
    /// The empty span
    pub const ZERO: Duration = Duration { nanos: 0 };

    /// Creates a duration from nanoseconds
    pub fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Creates a duration from microseconds
    pub fn from_micros(micros: u64) -> Self {
        Self {
            nanos: micros.saturating_mul(1_000),
        }
    }

    /// Creates a duration from milliseconds
    pub fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis.saturating_mul(1_000_000),
        }
    }

    /// Creates a duration from whole seconds
    pub fn from_secs(secs: u64) -> Self {
        Self {
            nanos: secs.saturating_mul(1_000_000_000),
        }
    }

    /// Nanoseconds in this duration
    pub fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Whole milliseconds in this duration
    pub fn as_millis(&self) -> u64 {
        self.nanos / 1_000_000
    }

    /// Returns whether the duration is zero
    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Integer division of one span by another, zero divisor yields zero
    pub fn div_duration(&self, unit: Duration) -> u64 {
        if unit.nanos == 0 {
            0
        } else {
            self.nanos / unit.nanos
        }
    }

    /// Saturating multiplication by a scalar
    pub fn saturating_mul(&self, factor: u64) -> Duration {
        Duration {
            nanos: self.nanos.saturating_mul(factor),
        }
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration {
            nanos: self.nanos.saturating_add(rhs.nanos),
        }
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        self.nanos = self.nanos.saturating_add(rhs.nanos);
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Duration {
        Duration {
            nanos: self.nanos.saturating_sub(rhs.nanos),
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos % 1_000_000 == 0 {
            write!(f, "{}ms", self.as_millis())
        } else {
            write!(f, "{}ns", self.nanos)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_arithmetic() {
        let start = Instant::from_nanos(1_000);
        let later = start + Duration::from_nanos(500);
        assert_eq!(later.as_nanos(), 1_500);
        assert_eq!(later.duration_since(start), Duration::from_nanos(500));
        assert_eq!(later - start, Duration::from_nanos(500));
    }

    #[test]
    fn test_duration_since_saturates() {
        let early = Instant::from_nanos(100);
        let late = Instant::from_nanos(200);
        assert_eq!(early.duration_since(late), Duration::ZERO);
    }

    #[test]
    fn test_duration_conversions() {
        assert_eq!(Duration::from_millis(3).as_nanos(), 3_000_000);
        assert_eq!(Duration::from_micros(5).as_nanos(), 5_000);
        assert_eq!(Duration::from_secs(1).as_millis(), 1_000);
    }

    #[test]
    fn test_div_duration() {
        let waited = Duration::from_millis(25);
        let unit = Duration::from_millis(10);
        assert_eq!(waited.div_duration(unit), 2);
        assert_eq!(waited.div_duration(Duration::ZERO), 0);
    }

    #[test]
    fn test_checked_add_overflow() {
        let near_end = Instant::from_nanos(u64::MAX - 10);
        assert!(near_end.checked_add(Duration::from_nanos(100)).is_none());
        assert!(near_end.checked_add(Duration::from_nanos(5)).is_some());
    }

    #[test]
    fn test_instant_ordering() {
        assert!(Instant::ZERO < Instant::from_nanos(1));
        let mut t = Instant::ZERO;
        t += Duration::from_millis(1);
        assert_eq!(t.as_nanos(), 1_000_000);
    }
}
