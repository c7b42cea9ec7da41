//! Wire protocol for fab client↔engine communication.
//!
//! One message is an opcode byte followed by the fields that opcode
//! carries, each as an 8-byte big-endian length prefix plus the raw
//! bytes. The framing is self-delimiting and suitable for any reliable
//! byte stream; in production it runs beneath the TLS control channel.
//!
//! Field sizes are bounded by [`Limits`], a configuration contract both
//! peers must agree on out of band. A message that declares a field
//! beyond its bound is rejected before the field is read.

mod codec;
mod message;

pub use codec::{ProtoError, recv, send};
pub use message::{Limits, Message};
