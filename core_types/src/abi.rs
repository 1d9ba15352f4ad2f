//! ABI discriminants and tagged register state
//!
//! Quanta may follow different binary-interface conventions natively.
//! The tag identifies the convention; the context carries the full saved
//! register representation for that convention. Context switches install
//! the representation as-is — there is no conversion step between tags.

use crate::memory::MemoryPerms;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary-interface family a quantum follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbiTag {
    /// 64-bit native convention (16 general-purpose registers)
    Native64,
    /// 32-bit compatibility convention (8 general-purpose registers)
    Compat32,
    /// Portable bytecode convention (slot machine, software-defined)
    Portable,
}

impl AbiTag {
    /// First virtual address past the end of this ABI's address layout
    pub fn layout_end(&self) -> u64 {
        match self {
            AbiTag::Compat32 => 1 << 32,
            AbiTag::Native64 | AbiTag::Portable => 1 << 47,
        }
    }

    /// Applies this ABI's permission semantics to requested permissions
    ///
    /// The result is what actually gets installed in the translation for
    /// a quantum of this tag:
    /// - `Native64` installs permissions unchanged.
    /// - `Compat32` cannot express execute-only mappings; execute implies
    ///   read.
    /// - `Portable` enforces write-xor-execute; a writable mapping loses
    ///   execute.
    pub fn resolve_perms(&self, requested: MemoryPerms) -> MemoryPerms {
        let mut perms = requested;
        match self {
            AbiTag::Native64 => {}
            AbiTag::Compat32 => {
                if perms.execute {
                    perms.read = true;
                }
            }
            AbiTag::Portable => {
                if perms.write {
                    perms.execute = false;
                }
            }
        }
        perms
    }
}

impl fmt::Display for AbiTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiTag::Native64 => write!(f, "native64"),
            AbiTag::Compat32 => write!(f, "compat32"),
            AbiTag::Portable => write!(f, "portable"),
        }
    }
}

/// Saved register state for the 64-bit native convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Native64Frame {
    pub gpr: [u64; 16],
    pub pc: u64,
    pub sp: u64,
    pub flags: u64,
}

impl Default for Native64Frame {
    fn default() -> Self {
        Self {
            gpr: [0; 16],
            pc: 0,
            sp: 0,
            flags: 0,
        }
    }
}

/// Saved register state for the 32-bit compatibility convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Compat32Frame {
    pub gpr: [u32; 8],
    pub pc: u32,
    pub sp: u32,
    pub flags: u32,
}

/// Saved state for the portable bytecode convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortableFrame {
    pub slots: [u64; 8],
    pub ip: u64,
    pub stack: u64,
}

/// Full saved context for a quantum, tagged by ABI
///
/// One variant per [`AbiTag`]. The scheduler stores and installs whole
/// variants; switching between quanta of differing tags requires no
/// translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbiContext {
    Native64(Native64Frame),
    Compat32(Compat32Frame),
    Portable(PortableFrame),
}

impl AbiContext {
    /// Builds the initial context for a fresh quantum
    ///
    /// Entry point and stack top are placed in the convention's program
    /// counter and stack pointer; everything else starts zeroed.
    pub fn initial(tag: AbiTag, entry: u64, stack_top: u64) -> Self {
        match tag {
            AbiTag::Native64 => AbiContext::Native64(Native64Frame {
                pc: entry,
                sp: stack_top,
                ..Native64Frame::default()
            }),
            AbiTag::Compat32 => AbiContext::Compat32(Compat32Frame {
                pc: entry as u32,
                sp: stack_top as u32,
                ..Compat32Frame::default()
            }),
            AbiTag::Portable => AbiContext::Portable(PortableFrame {
                ip: entry,
                stack: stack_top,
                ..PortableFrame::default()
            }),
        }
    }

    /// Returns the ABI tag this context belongs to
    pub fn tag(&self) -> AbiTag {
        match self {
            AbiContext::Native64(_) => AbiTag::Native64,
            AbiContext::Compat32(_) => AbiTag::Compat32,
            AbiContext::Portable(_) => AbiTag::Portable,
        }
    }

    /// Returns the saved program counter
    pub fn program_counter(&self) -> u64 {
        match self {
            AbiContext::Native64(frame) => frame.pc,
            AbiContext::Compat32(frame) => frame.pc as u64,
            AbiContext::Portable(frame) => frame.ip,
        }
    }

    /// Returns the saved stack pointer
    pub fn stack_pointer(&self) -> u64 {
        match self {
            AbiContext::Native64(frame) => frame.sp,
            AbiContext::Compat32(frame) => frame.sp as u64,
            AbiContext::Portable(frame) => frame.stack,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_context_carries_entry_and_stack() {
        let ctx = AbiContext::initial(AbiTag::Native64, 0x40_0000, 0x7fff_f000);
        assert_eq!(ctx.tag(), AbiTag::Native64);
        assert_eq!(ctx.program_counter(), 0x40_0000);
        assert_eq!(ctx.stack_pointer(), 0x7fff_f000);
    }

    #[test]
    fn test_compat32_truncates_to_32_bits() {
        let ctx = AbiContext::initial(AbiTag::Compat32, 0x1000, 0xffff_0000);
        assert_eq!(ctx.tag(), AbiTag::Compat32);
        assert_eq!(ctx.program_counter(), 0x1000);
        assert_eq!(ctx.stack_pointer(), 0xffff_0000);
    }

    #[test]
    fn test_layout_end_per_tag() {
        assert_eq!(AbiTag::Compat32.layout_end(), 1 << 32);
        assert_eq!(AbiTag::Native64.layout_end(), 1 << 47);
        assert_eq!(AbiTag::Portable.layout_end(), 1 << 47);
    }

    #[test]
    fn test_native64_perms_pass_through() {
        let perms = MemoryPerms::all();
        assert_eq!(AbiTag::Native64.resolve_perms(perms), perms);
    }

    #[test]
    fn test_compat32_execute_implies_read() {
        let perms = MemoryPerms {
            read: false,
            write: false,
            execute: true,
        };
        let resolved = AbiTag::Compat32.resolve_perms(perms);
        assert!(resolved.read);
        assert!(resolved.execute);
    }

    #[test]
    fn test_portable_strips_execute_from_writable() {
        let perms = MemoryPerms::all();
        let resolved = AbiTag::Portable.resolve_perms(perms);
        assert!(resolved.read);
        assert!(resolved.write);
        assert!(!resolved.execute);
    }

    #[test]
    fn test_context_tag_matches_variant() {
        for tag in [AbiTag::Native64, AbiTag::Compat32, AbiTag::Portable] {
            let ctx = AbiContext::initial(tag, 0, 0);
            assert_eq!(ctx.tag(), tag);
        }
    }
}
