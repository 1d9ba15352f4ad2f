//! # Core Types
//!
//! Fundamental vocabulary shared by every layer of the Quanta core:
//! entity identifiers, ABI discriminants, and the memory model.
//!
//! ## Philosophy
//!
//! - **Identifiers are opaque**: every entity id is a newtype over a UUID,
//!   never a raw integer that can be confused with another resource.
//! - **ABI is data, not configuration**: a quantum's binary-interface
//!   convention travels with it as a tag; nothing in the core converts
//!   between conventions.
//! - **Memory is explicit**: ranges, permissions, and backing kinds are
//!   plain values that the memory manager interprets.
//!
//! This crate has no dependency on any other workspace member.

pub mod abi;
pub mod ids;
pub mod memory;

pub use abi::{AbiContext, AbiTag, Compat32Frame, Native64Frame, PortableFrame};
pub use ids::QuantumId;
pub use memory::{
    AccessType, AddressSpaceId, BackingKind, MemoryError, MemoryPerms, RegionId, VirtRange,
    PAGE_SIZE,
};
