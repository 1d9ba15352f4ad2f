//! Boot-time machine description
//!
//! Handed to the kernel exactly once, during the Boot to Initializing
//! transition. Everything the core needs to size its allocators comes
//! from here.

use core_types::PAGE_SIZE;
use serde::{Deserialize, Serialize};

/// Classification of a physical memory span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryMapKind {
    /// Free for kernel allocation
    Usable,
    /// Firmware or device-owned; never allocated from
    Reserved,
}

/// A contiguous span of physical memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysSpan {
    pub base: u64,
    pub len: u64,
    pub kind: MemoryMapKind,
}

/// Everything the bootstrap environment tells the kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootInfo {
    pub memory_map: Vec<PhysSpan>,
    pub command_line: String,
}

impl BootInfo {
    /// Total usable physical memory in bytes
    pub fn usable_bytes(&self) -> u64 {
        self.memory_map
            .iter()
            .filter(|span| span.kind == MemoryMapKind::Usable)
            .map(|span| span.len)
            .sum()
    }

    /// Number of whole usable page frames
    pub fn usable_frames(&self) -> usize {
        (self.usable_bytes() / PAGE_SIZE) as usize
    }

    /// A map with a single usable span, convenient for hosted runs
    pub fn with_usable_bytes(len: u64) -> Self {
        Self {
            memory_map: vec![PhysSpan {
                base: 0x10_0000,
                len,
                kind: MemoryMapKind::Usable,
            }],
            command_line: String::new(),
        }
    }
}
