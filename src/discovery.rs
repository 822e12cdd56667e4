//! World discovery: answers unconnected pings with the current
//! advertisement, and pings the remote server so the proxy can mirror its
//! protocol and version.
//!
//! Replying to pings locally matters on a busy LAN, where clients broadcast
//! several pings per second; the echoed timestamp is mandatory because
//! clients derive latency from it and drop servers whose pong fails
//! validation.

use crate::wire::{
    ServerAdvertisement, UnconnectedPing, UnconnectedPong, OPEN_CONNECTION_PING, UNCONNECTED_PING,
};
use anyhow::Context;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::watch;

/// Answers discovery pings from the latest published advertisement.
pub struct Responder {
    server_guid: u64,
    advertisement: watch::Receiver<String>,
}

impl Responder {
    pub fn new(server_guid: u64, advertisement: watch::Receiver<String>) -> Self {
        Self {
            server_guid,
            advertisement,
        }
    }

    /// Builds the pong reply for a ping datagram.
    ///
    /// Returns `None` for anything that is not a ping (or a ping too short
    /// to carry a timestamp); those datagrams belong to the transport's
    /// connection-establishment path.
    pub fn handle_ping(&self, datagram: &[u8]) -> Option<Vec<u8>> {
        if datagram.len() < 9 {
            return None;
        }
        match datagram[0] {
            UNCONNECTED_PING | OPEN_CONNECTION_PING => {}
            _ => return None,
        }

        let timestamp = u64::from_be_bytes(datagram[1..9].try_into().unwrap());
        Some(
            UnconnectedPong {
                timestamp,
                server_guid: self.server_guid,
                payload: self.advertisement.borrow().clone(),
            }
            .encode(),
        )
    }
}

/// Sends one unconnected ping to `addr` and parses the advertisement out of
/// the pong. Used at startup and by the periodic refresh so the proxy
/// advertises the exact protocol and version the remote server speaks.
pub async fn ping_server(
    addr: SocketAddr,
    timeout: Duration,
) -> anyhow::Result<ServerAdvertisement> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("binding ping socket")?;

    let ping = UnconnectedPing {
        timestamp: unix_millis(),
        client_guid: rand::random(),
    };
    socket
        .send_to(&ping.encode(), addr)
        .await
        .with_context(|| format!("pinging {addr}"))?;

    let mut buf = [0u8; 1500];
    let (len, _) = tokio::time::timeout(timeout, socket.recv_from(&mut buf))
        .await
        .map_err(|_| anyhow::anyhow!("timed out pinging {addr}"))?
        .context("receiving pong")?;

    let pong = UnconnectedPong::decode(&buf[..len])
        .with_context(|| format!("parsing pong from {addr}"))?;
    pong.payload
        .parse()
        .with_context(|| format!("parsing advertisement from {addr}"))
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
