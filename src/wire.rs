//! Offline RakNet wire primitives: the discovery ping/pong frames and the
//! semicolon-delimited server advertisement ("MOTD") they carry.
//!
//! Everything here is a pure function over byte slices; the reliable RakNet
//! layer never sees these frames.

use std::fmt::{self, Display};
use std::str::FromStr;

/// Magic included verbatim in every offline RakNet message.
pub const OFFLINE_MESSAGE_DATA_ID: [u8; 16] = [
    0x00, 0xFF, 0xFF, 0x00, 0xFE, 0xFE, 0xFE, 0xFE, 0xFD, 0xFD, 0xFD, 0xFD, 0x12, 0x34, 0x56, 0x78,
];

pub const UNCONNECTED_PING: u8 = 0x01;
/// Variant of [`UNCONNECTED_PING`] some console clients send instead.
pub const OPEN_CONNECTION_PING: u8 = 0x02;
pub const UNCONNECTED_PONG: u8 = 0x1C;

/// An error while parsing an offline frame or advertisement string.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame is truncated: expected at least {0} bytes, got {1}")]
    Truncated(usize, usize),
    #[error("unexpected packet id {0:#04x}")]
    UnexpectedId(u8),
    #[error("advertisement does not start with the MCPE edition tag")]
    NotBedrock,
    #[error("advertisement is missing the {0} field")]
    MissingField(&'static str),
    #[error("advertisement field {0} is not a number")]
    BadNumber(&'static str),
    #[error("advertisement payload is not valid UTF-8")]
    BadUtf8(#[from] std::str::Utf8Error),
}

/// The data shown to clients in world discovery, serialized as the
/// semicolon-delimited advertisement string:
///
/// ```text
/// MCPE;<motd>;<protocol>;<version>;<online>;<max>;<serverId>;<subMotd>;<gameType>;1;<port4>;<port6>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAdvertisement {
    pub motd: String,
    pub protocol: i32,
    pub version: String,
    pub player_count: u32,
    pub max_players: u32,
    pub server_guid: u64,
    pub sub_motd: String,
    pub game_type: String,
    pub port_v4: u16,
    pub port_v6: u16,
}

impl Display for ServerAdvertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MCPE;{};{};{};{};{};{};{};{};1;{};{}",
            self.motd,
            self.protocol,
            self.version,
            self.player_count,
            self.max_players,
            self.server_guid,
            self.sub_motd,
            self.game_type,
            self.port_v4,
            self.port_v6,
        )
    }
}

impl FromStr for ServerAdvertisement {
    type Err = WireError;

    /// Parses an advertisement string. Trailing surplus fields (and a
    /// trailing semicolon) are tolerated; fields past the player counts are
    /// optional because older servers omit them.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split(';');
        if fields.next() != Some("MCPE") {
            return Err(WireError::NotBedrock);
        }

        let mut next = |name: &'static str| fields.next().ok_or(WireError::MissingField(name));
        let motd = next("motd")?.to_owned();
        let protocol = next("protocol")?
            .trim()
            .parse()
            .map_err(|_| WireError::BadNumber("protocol"))?;
        let version = next("version")?.to_owned();
        let player_count = next("player count")?
            .trim()
            .parse()
            .map_err(|_| WireError::BadNumber("player count"))?;
        let max_players = next("max players")?
            .trim()
            .parse()
            .map_err(|_| WireError::BadNumber("max players"))?;

        let server_guid = fields.next().and_then(|f| f.trim().parse().ok()).unwrap_or(0);
        let sub_motd = fields.next().unwrap_or_default().to_owned();
        let game_type = match fields.next() {
            Some(tag) if !tag.is_empty() => tag.to_owned(),
            _ => "Survival".to_owned(),
        };
        let _game_type_numeric = fields.next();
        let port_v4 = fields.next().and_then(|f| f.trim().parse().ok()).unwrap_or(19132);
        let port_v6 = fields.next().and_then(|f| f.trim().parse().ok()).unwrap_or(19133);

        Ok(Self {
            motd,
            protocol,
            version,
            player_count,
            max_players,
            server_guid,
            sub_motd,
            game_type,
            port_v4,
            port_v6,
        })
    }
}

/// An `UNCONNECTED_PING` frame: `[1]` id, `[8]` timestamp, `[16]` magic,
/// `[8]` client guid. 33 bytes total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnconnectedPing {
    pub timestamp: u64,
    pub client_guid: u64,
}

impl UnconnectedPing {
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(33);
        frame.push(UNCONNECTED_PING);
        frame.extend(self.timestamp.to_be_bytes());
        frame.extend(OFFLINE_MESSAGE_DATA_ID);
        frame.extend(self.client_guid.to_be_bytes());
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        if frame.len() < 33 {
            return Err(WireError::Truncated(33, frame.len()));
        }
        match frame[0] {
            UNCONNECTED_PING | OPEN_CONNECTION_PING => {}
            other => return Err(WireError::UnexpectedId(other)),
        }
        Ok(Self {
            timestamp: u64::from_be_bytes(frame[1..9].try_into().unwrap()),
            client_guid: u64::from_be_bytes(frame[25..33].try_into().unwrap()),
        })
    }
}

/// An `UNCONNECTED_PONG` frame: `[1]` id, `[8]` echoed timestamp,
/// `[8]` server guid, `[16]` magic, `[2]` payload length, `[N]` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconnectedPong {
    pub timestamp: u64,
    pub server_guid: u64,
    pub payload: String,
}

impl UnconnectedPong {
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload.as_bytes();
        let mut frame = Vec::with_capacity(35 + payload.len());
        frame.push(UNCONNECTED_PONG);
        frame.extend(self.timestamp.to_be_bytes());
        frame.extend(self.server_guid.to_be_bytes());
        frame.extend(OFFLINE_MESSAGE_DATA_ID);
        frame.extend((payload.len() as u16).to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        if frame.len() < 35 {
            return Err(WireError::Truncated(35, frame.len()));
        }
        if frame[0] != UNCONNECTED_PONG {
            return Err(WireError::UnexpectedId(frame[0]));
        }
        let timestamp = u64::from_be_bytes(frame[1..9].try_into().unwrap());
        let server_guid = u64::from_be_bytes(frame[9..17].try_into().unwrap());
        let length = u16::from_be_bytes(frame[33..35].try_into().unwrap()) as usize;
        let payload = frame[35..].get(..length).unwrap_or(&frame[35..]);
        Ok(Self {
            timestamp,
            server_guid,
            payload: std::str::from_utf8(payload)?.to_owned(),
        })
    }
}
