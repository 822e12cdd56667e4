//! Codec for the batch framing game packets travel in over RakNet.
//!
//! Every game datagram is a `0xFE`-marked batch of length-prefixed packet
//! frames. Once network settings have been exchanged on a link, batches
//! additionally carry a one-byte compression marker after `0xFE`; the proxy
//! dictates a zero compression threshold, so it always emits the
//! "uncompressed" marker and inflates zlib batches only on receive.

use super::BUFFER_LIMIT;
use crate::protocol::{packet::Packet, decoder, DecodeError, Decoder, Encoder};
use std::io::Read;

/// Marker distinguishing game batches from RakNet-internal datagrams.
pub const BATCH_MARKER: u8 = 0xFE;

const COMPRESSION_ZLIB: u8 = 0x00;
const COMPRESSION_NONE: u8 = 0xFF;

/// Per-link batch codec state. Both peers of a session use the same
/// settings, so re-encoding a decoded batch for the other peer is lossless.
#[derive(Debug, Default)]
pub struct GameCodec {
    framed: bool,
}

impl GameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the link into framed mode. Called once network settings have
    /// been sent (upstream) or received (downstream) on the link.
    pub fn enable_framing(&mut self) {
        self.framed = true;
    }

    pub fn is_framed(&self) -> bool {
        self.framed
    }

    /// Decodes a received datagram into the packets of its batch.
    pub fn decode_batch(&self, datagram: &[u8]) -> decoder::Result<Vec<Packet>> {
        let mut decoder = Decoder::new(datagram);
        if decoder.read_u8()? != BATCH_MARKER {
            return Err(DecodeError::MissingBatchMarker);
        }

        let contents = if self.framed {
            match decoder.read_u8()? {
                COMPRESSION_NONE => decoder.buffer().to_vec(),
                COMPRESSION_ZLIB => {
                    let mut inflated = Vec::new();
                    flate2::read::DeflateDecoder::new(decoder.buffer())
                        .take(BUFFER_LIMIT as u64)
                        .read_to_end(&mut inflated)
                        .map_err(|e| DecodeError::Other(e.into()))?;
                    inflated
                }
                other => return Err(DecodeError::UnsupportedCompression(other)),
            }
        } else {
            decoder.buffer().to_vec()
        };

        let mut frames = Decoder::new(&contents);
        let mut packets = Vec::new();
        while !frames.is_finished() {
            let length = usize::try_from(frames.read_var_u32()?)?;
            let frame = frames.consume_slice(length)?;
            packets.push(Packet::decode_frame(frame)?);
        }
        Ok(packets)
    }

    /// Encodes packets into one batch datagram ready to send.
    pub fn encode_batch(&self, packets: &[Packet]) -> Vec<u8> {
        let mut datagram = vec![BATCH_MARKER];
        if self.framed {
            datagram.push(COMPRESSION_NONE);
        }

        let mut frame = Vec::new();
        for packet in packets {
            frame.clear();
            packet.encode_frame(&mut frame);
            let mut encoder = Encoder::new(&mut datagram);
            encoder.write_var_u32(frame.len() as u32);
            encoder.write_slice(&frame);
        }
        datagram
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::{RawPacket, RequestNetworkSettings};
    use flate2::{write::DeflateEncoder, Compression};
    use std::io::Write;

    #[test]
    fn unframed_batch_roundtrip() {
        let codec = GameCodec::new();
        let packets = vec![Packet::RequestNetworkSettings(RequestNetworkSettings {
            protocol_version: 729,
        })];

        let datagram = codec.encode_batch(&packets);
        assert_eq!(datagram[0], BATCH_MARKER);

        let decoded = codec.decode_batch(&datagram).unwrap();
        assert_eq!(decoded, packets);
    }

    #[test]
    fn framed_batch_roundtrip_preserves_packet_bytes() {
        let mut codec = GameCodec::new();
        codec.enable_framing();

        let packets = vec![
            Packet::Raw(RawPacket::new(0x09, b"\x00hello".to_vec())),
            Packet::Raw(RawPacket::new(0x13, vec![1, 2, 3, 4])),
        ];

        let datagram = codec.encode_batch(&packets);
        assert_eq!(&datagram[..2], &[BATCH_MARKER, COMPRESSION_NONE]);

        let decoded = codec.decode_batch(&datagram).unwrap();
        assert_eq!(decoded, packets);
    }

    #[test]
    fn framed_codec_inflates_zlib_batches() {
        let mut codec = GameCodec::new();
        codec.enable_framing();

        // Hand-build a deflate-compressed batch containing one raw packet.
        let mut frame = Vec::new();
        Packet::Raw(RawPacket::new(0x09, b"compressed".to_vec())).encode_frame(&mut frame);
        let mut contents = Vec::new();
        Encoder::new(&mut contents).write_var_u32(frame.len() as u32);
        contents.extend_from_slice(&frame);

        let mut deflater = DeflateEncoder::new(Vec::new(), Compression::fast());
        deflater.write_all(&contents).unwrap();
        let mut datagram = vec![BATCH_MARKER, COMPRESSION_ZLIB];
        datagram.extend(deflater.finish().unwrap());

        let decoded = codec.decode_batch(&datagram).unwrap();
        assert_eq!(
            decoded,
            vec![Packet::Raw(RawPacket::new(0x09, b"compressed".to_vec()))]
        );
    }

    #[test]
    fn non_batch_datagram_is_rejected() {
        let codec = GameCodec::new();
        assert!(matches!(
            codec.decode_batch(&[0x00, 1, 2, 3]),
            Err(DecodeError::MissingBatchMarker)
        ));
    }

    #[test]
    fn snappy_marker_is_rejected() {
        let mut codec = GameCodec::new();
        codec.enable_framing();
        assert!(matches!(
            codec.decode_batch(&[BATCH_MARKER, 0x01, 0, 0]),
            Err(DecodeError::UnsupportedCompression(0x01))
        ));
    }
}
