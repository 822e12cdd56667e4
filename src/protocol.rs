//! Implements the parts of the Bedrock game protocol the proxy needs.
//!
//! Only the packets that take part in the login arbitration are given real
//! bodies; everything else travels through the proxy as raw header + body
//! bytes and is re-encoded without loss.

/// Game protocol version advertised when the remote server cannot be pinged.
pub const PROTOCOL_VERSION: i32 = 729;

/// Game version string matching [`PROTOCOL_VERSION`].
pub const MINECRAFT_VERSION: &str = "1.21.30";

pub mod decoder;
pub mod encoder;
pub mod game_codec;
pub mod packet;

pub use decoder::{Decode, DecodeError, Decoder};
pub use encoder::{Encode, Encoder};
pub use game_codec::GameCodec;
pub use packet::Packet;

/// Limit to avoid out-of-memory DOS on decompression.
const BUFFER_LIMIT: usize = 8 * 1024 * 1024; // 8 MiB
