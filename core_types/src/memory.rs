//! # Memory Model
//!
//! Vocabulary for the memory manager: virtual ranges, permissions,
//! backing kinds, and the memory error taxonomy.
//!
//! ## Philosophy
//!
//! - **Ranges are page-granular**: every mapping covers whole pages.
//! - **Regions never overlap**: the memory manager enforces this at map
//!   time and treats a post-hoc overlap as a fatal invariant violation.
//! - **Sharing is explicit**: a region is only shared across address
//!   spaces through a reference-counted physical backing, never by
//!   accident.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Page size in bytes
pub const PAGE_SIZE: u64 = 4096;

/// Unique identifier for an address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressSpaceId(Uuid);

impl AddressSpaceId {
    /// Creates a new unique address space ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID value
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AddressSpaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aspace:{}", self.0)
    }
}

/// Unique identifier for a region within an address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionId(Uuid);

impl RegionId {
    /// Creates a new unique region ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID value
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RegionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region:{}", self.0)
    }
}

/// A page-aligned virtual range, half-open: `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VirtRange {
    pub start: u64,
    pub end: u64,
}

impl VirtRange {
    /// Creates a range from start and end addresses
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Creates a range from a start address and a length in bytes
    pub fn from_span(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(len),
        }
    }

    /// Length of the range in bytes
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Returns whether the range is empty
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Returns whether both bounds sit on page boundaries
    pub fn is_page_aligned(&self) -> bool {
        self.start % PAGE_SIZE == 0 && self.end % PAGE_SIZE == 0
    }

    /// Number of pages covered by the range
    pub fn page_count(&self) -> u64 {
        self.len() / PAGE_SIZE
    }

    /// Returns whether an address falls inside the range
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }

    /// Returns whether two ranges intersect
    pub fn overlaps(&self, other: &VirtRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Index of the page containing an address, relative to the range start
    ///
    /// Callers must ensure the address is inside the range.
    pub fn page_index(&self, address: u64) -> usize {
        ((address - self.start) / PAGE_SIZE) as usize
    }
}

impl fmt::Display for VirtRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}

/// Permission bits for a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryPerms {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl MemoryPerms {
    /// No permissions
    pub fn none() -> Self {
        Self {
            read: false,
            write: false,
            execute: false,
        }
    }

    /// Read-only permission
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            execute: false,
        }
    }

    /// Read and write permissions
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            execute: false,
        }
    }

    /// Read and execute permissions (typical for code)
    pub fn read_execute() -> Self {
        Self {
            read: true,
            write: false,
            execute: true,
        }
    }

    /// All permissions (use sparingly)
    pub fn all() -> Self {
        Self {
            read: true,
            write: true,
            execute: true,
        }
    }

    /// Intersection of two permission sets
    pub fn intersect(&self, other: MemoryPerms) -> MemoryPerms {
        MemoryPerms {
            read: self.read && other.read,
            write: self.write && other.write,
            execute: self.execute && other.execute,
        }
    }

    /// Returns whether an access kind is allowed by these permissions
    pub fn allows(&self, access: AccessType) -> bool {
        match access {
            AccessType::Read => self.read,
            AccessType::Write => self.write,
            AccessType::Execute => self.execute,
        }
    }
}

impl fmt::Display for MemoryPerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.read { "R" } else { "-" },
            if self.write { "W" } else { "-" },
            if self.execute { "X" } else { "-" }
        )
    }
}

/// Kind of memory access that caused a fault or is being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessType {
    Read,
    Write,
    Execute,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessType::Read => write!(f, "read"),
            AccessType::Write => write!(f, "write"),
            AccessType::Execute => write!(f, "execute"),
        }
    }
}

/// Backing kind requested when mapping a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackingKind {
    /// Demand-populated private pages
    Anonymous,
    /// Reference-counted physical backing shared across address spaces
    Shared,
    /// Pages held in compressed form, restored on first access
    CompressedResident,
}

impl fmt::Display for BackingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackingKind::Anonymous => write!(f, "anonymous"),
            BackingKind::Shared => write!(f, "shared"),
            BackingKind::CompressedResident => write!(f, "compressed-resident"),
        }
    }
}

/// Memory-related errors
///
/// The first group is recoverable and returned to the requesting quantum.
/// The second group ([`MemoryError::is_fatal`]) indicates a kernel
/// invariant violation; dispatch escalates those to a panic rather than
/// returning them to any caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("range {range} overlaps an existing region in {space}")]
    Overlap { space: AddressSpaceId, range: VirtRange },

    #[error("range {range} is invalid for the layout of {space}")]
    OutOfAddressSpace { space: AddressSpaceId, range: VirtRange },

    #[error("segmentation fault: {access} at {address:#x} in {space}")]
    SegmentationFault {
        space: AddressSpaceId,
        address: u64,
        access: AccessType,
    },

    #[error("out of physical memory: requested {requested} frame(s), {available} free")]
    OutOfMemory { requested: usize, available: usize },

    #[error("region {0} cannot be compressed in its current state")]
    NotCompressible(RegionId),

    // Fatal from here down.
    #[error("unknown region {0}")]
    UnknownRegion(RegionId),

    #[error("unknown address space {0}")]
    UnknownSpace(AddressSpaceId),

    #[error("stale frame handle: index {index}, generation {generation}")]
    StaleFrame { index: u32, generation: u32 },

    #[error("corrupt compressed page: {0}")]
    CorruptCompressedPage(String),

    #[error("internal memory manager fault: {0}")]
    Internal(String),
}

impl MemoryError {
    /// Returns whether this error is a kernel invariant violation
    ///
    /// Fatal errors must never be surfaced to a quantum; they force the
    /// dispatch state machine into Panic.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MemoryError::UnknownRegion(_)
                | MemoryError::UnknownSpace(_)
                | MemoryError::StaleFrame { .. }
                | MemoryError::CorruptCompressedPage(_)
                | MemoryError::Internal(_)
        )
    }
}
