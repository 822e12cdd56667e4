//! Enumerates the game packets the proxy can tell apart.
//!
//! Full parsing of packets is _not_ implemented. Only the packets whose
//! handling cannot be blind passthrough get real bodies; every other packet
//! is decoded as its raw header plus the rest of its bytes. (This enables
//! roundtrip encoding/decoding without loss of information.)

use crate::protocol::{decoder, Decode, Decoder, Encode, Encoder};

/// Packet ids the session dispatches on. The low ten bits of the header
/// varint hold the id; the upper bits carry sender/target sub-client slots.
pub mod id {
    pub const LOGIN: u32 = 0x01;
    pub const PLAY_STATUS: u32 = 0x02;
    pub const SERVER_TO_CLIENT_HANDSHAKE: u32 = 0x03;
    pub const CLIENT_TO_SERVER_HANDSHAKE: u32 = 0x04;
    pub const DISCONNECT: u32 = 0x05;
    pub const NETWORK_SETTINGS: u32 = 0x8F;
    pub const REQUEST_NETWORK_SETTINGS: u32 = 0xC1;
}

const HEADER_ID_MASK: u32 = 0x3FF;

/// A packet kept in its wire form: the full header varint (id plus
/// sub-client slots) and the undecoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub header: u32,
    pub body: Vec<u8>,
}

impl RawPacket {
    pub fn new(id: u32, body: Vec<u8>) -> Self {
        Self { header: id, body }
    }

    pub fn id(&self) -> u32 {
        self.header & HEADER_ID_MASK
    }
}

/// First packet of the modern login sequence; carries the client's
/// declared game protocol version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestNetworkSettings {
    pub protocol_version: i32,
}

impl Encode for RequestNetworkSettings {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_be(self.protocol_version);
    }
}

impl Decode for RequestNetworkSettings {
    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            protocol_version: decoder.read_i32_be()?,
        })
    }
}

/// Compression settings the server dictates in reply to
/// [`RequestNetworkSettings`].
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkSettings {
    pub compression_threshold: u16,
    pub compression_algorithm: u16,
    pub client_throttle_enabled: bool,
    pub client_throttle_threshold: u8,
    pub client_throttle_scalar: f32,
}

impl NetworkSettings {
    pub const COMPRESSION_ZLIB: u16 = 0;

    /// The settings the proxy dictates to its clients: zlib algorithm with a
    /// zero threshold (nothing actually compressed) and throttling off.
    pub fn proxy_defaults() -> Self {
        Self {
            compression_threshold: 0,
            compression_algorithm: Self::COMPRESSION_ZLIB,
            client_throttle_enabled: false,
            client_throttle_threshold: 0,
            client_throttle_scalar: 0.0,
        }
    }
}

impl Encode for NetworkSettings {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u16(self.compression_threshold);
        encoder.write_u16(self.compression_algorithm);
        encoder.write_bool(self.client_throttle_enabled);
        encoder.write_u8(self.client_throttle_threshold);
        encoder.write_f32(self.client_throttle_scalar);
    }
}

impl Decode for NetworkSettings {
    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            compression_threshold: decoder.read_u16()?,
            compression_algorithm: decoder.read_u16()?,
            client_throttle_enabled: decoder.read_bool()?,
            client_throttle_threshold: decoder.read_u8()?,
            client_throttle_scalar: decoder.read_f32()?,
        })
    }
}

/// Login progress notifications from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayStatus {
    pub status: i32,
}

impl PlayStatus {
    pub const LOGIN_SUCCESS: i32 = 0;
    pub const PLAYER_SPAWN: i32 = 3;

    /// Whether this status completes the login as far as the proxy is
    /// concerned and flips the session into passthrough.
    pub fn completes_login(&self) -> bool {
        self.status == Self::LOGIN_SUCCESS || self.status == Self::PLAYER_SPAWN
    }
}

impl Encode for PlayStatus {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_be(self.status);
    }
}

impl Decode for PlayStatus {
    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        Ok(Self {
            status: decoder.read_i32_be()?,
        })
    }
}

/// Disconnect notification. Only synthesized by the proxy (to carry a
/// diagnostic reason to the client); server-sent disconnects pass through
/// as [`RawPacket`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub reason: i32,
    pub message: Option<String>,
}

impl Disconnect {
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            reason: 0,
            message: Some(message.into()),
        }
    }
}

impl Encode for Disconnect {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_i32(self.reason);
        encoder.write_bool(self.message.is_none());
        if let Some(message) = &self.message {
            encoder.write_string(message);
            // filtered message, same content
            encoder.write_string(message);
        }
    }
}

impl Decode for Disconnect {
    fn decode(decoder: &mut Decoder) -> decoder::Result<Self> {
        let reason = decoder.read_var_i32()?;
        let skip_message = decoder.read_bool()?;
        let message = if skip_message {
            None
        } else {
            Some(decoder.read_string()?.to_owned())
        };
        Ok(Self { reason, message })
    }
}

/// A single game packet inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    RequestNetworkSettings(RequestNetworkSettings),
    PlayStatus(PlayStatus),
    NetworkSettings(NetworkSettings),
    ClientToServerHandshake,
    Disconnect(Disconnect),
    Raw(RawPacket),
}

impl Packet {
    /// The packet id used for session dispatch.
    pub fn id(&self) -> u32 {
        match self {
            Packet::RequestNetworkSettings(_) => id::REQUEST_NETWORK_SETTINGS,
            Packet::PlayStatus(_) => id::PLAY_STATUS,
            Packet::NetworkSettings(_) => id::NETWORK_SETTINGS,
            Packet::ClientToServerHandshake => id::CLIENT_TO_SERVER_HANDSHAKE,
            Packet::Disconnect(_) => id::DISCONNECT,
            Packet::Raw(raw) => raw.id(),
        }
    }

    /// Decodes one packet from the contents of a batch frame.
    ///
    /// Packets the session only routes by identity are kept raw so they
    /// re-encode byte-identically.
    pub fn decode_frame(frame: &[u8]) -> decoder::Result<Self> {
        let mut decoder = Decoder::new(frame);
        let header = decoder.read_var_u32()?;
        match header & HEADER_ID_MASK {
            id::REQUEST_NETWORK_SETTINGS => Ok(Packet::RequestNetworkSettings(
                RequestNetworkSettings::decode(&mut decoder)?,
            )),
            id::PLAY_STATUS => Ok(Packet::PlayStatus(PlayStatus::decode(&mut decoder)?)),
            _ => Ok(Packet::Raw(RawPacket {
                header,
                body: decoder.buffer().to_vec(),
            })),
        }
    }

    /// Encodes this packet (header varint plus body) into a batch frame.
    pub fn encode_frame(&self, buffer: &mut Vec<u8>) {
        let mut encoder = Encoder::new(buffer);
        match self {
            Packet::Raw(raw) => {
                encoder.write_var_u32(raw.header);
                encoder.write_slice(&raw.body);
            }
            Packet::RequestNetworkSettings(packet) => {
                encoder.write_var_u32(id::REQUEST_NETWORK_SETTINGS);
                packet.encode(&mut encoder);
            }
            Packet::PlayStatus(packet) => {
                encoder.write_var_u32(id::PLAY_STATUS);
                packet.encode(&mut encoder);
            }
            Packet::NetworkSettings(packet) => {
                encoder.write_var_u32(id::NETWORK_SETTINGS);
                packet.encode(&mut encoder);
            }
            Packet::ClientToServerHandshake => {
                encoder.write_var_u32(id::CLIENT_TO_SERVER_HANDSHAKE);
            }
            Packet::Disconnect(packet) => {
                encoder.write_var_u32(id::DISCONNECT);
                packet.encode(&mut encoder);
            }
        }
    }
}
