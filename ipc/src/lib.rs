//! # IPC Vocabulary
//!
//! Messages, payloads, and conduit identifiers shared between the kernel
//! core and anything that speaks to it.
//!
//! ## Philosophy
//!
//! - **Small payloads travel inline**: anything at or under
//!   [`INLINE_PAYLOAD_MAX`] bytes is copied with the message.
//! - **Large payloads travel by region**: above the threshold the bytes
//!   live in a shared memory region and the message carries a handle.
//! - **Conduits have exactly two ends**: there is no broadcast at this
//!   layer; fan-out is built on top.

pub mod conduit;
pub mod message;

pub use conduit::{ConduitId, EndpointSide};
pub use message::{Message, MessageId, Payload, PayloadError, INLINE_PAYLOAD_MAX};
