//! LAN advertiser: makes the proxy show up in the Bedrock client's
//! "Friends"/LAN worlds list by broadcasting unsolicited unconnected pongs.
//!
//! Broadcasts go to both the global broadcast address and every interface's
//! directed subnet broadcast (e.g. `192.168.1.255`) — Windows hosts often
//! ignore the global one. Clients that spot a pong ping its source address
//! back to measure latency, so the advertiser answers pings on its own
//! socket too.

use crate::discovery::Responder;
use crate::wire::UnconnectedPong;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Bedrock clients listen for LAN worlds on this port only; it is not
/// related to the proxy's own listen port.
const LAN_DISCOVERY_PORT: u16 = 19132;

/// Handle to the running advertiser task.
pub struct LanAdvertiser {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LanAdvertiser {
    pub fn spawn(
        server_guid: u64,
        interval: Duration,
        advertisement: watch::Receiver<String>,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(server_guid, interval, advertisement, stop_rx));
        Self { stop, task }
    }

    /// Requests a clean stop; the task winds down within one interval.
    pub async fn stop(self) {
        self.stop.send(true).ok();
        self.task.await.ok();
    }
}

async fn run(
    server_guid: u64,
    interval: Duration,
    advertisement: watch::Receiver<String>,
    mut stop: watch::Receiver<bool>,
) {
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::error!("LAN advertiser could not bind its socket: {e}");
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        tracing::error!("LAN advertiser could not enable broadcast: {e}");
        return;
    }

    let responder = Responder::new(server_guid, advertisement.clone());
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    let mut buf = [0u8; 1500];

    tracing::info!(
        "LAN advertiser started (interval {} ms, targets {:?})",
        interval.as_millis(),
        broadcast_targets()
    );

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                let pong = UnconnectedPong {
                    timestamp: started.elapsed().as_millis() as u64,
                    server_guid,
                    payload: advertisement.borrow().clone(),
                }
                .encode();
                broadcast(&socket, &pong).await;
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    if let Some(reply) = responder.handle_ping(&buf[..len]) {
                        if let Err(e) = socket.send_to(&reply, from).await {
                            tracing::trace!("discovery reply to {from} failed: {e}");
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("LAN advertiser socket lost: {e}");
                    break;
                }
            }
        }
    }

    tracing::info!("LAN advertiser stopped");
}

/// Sends one pong to every broadcast destination. Per-destination failures
/// are expected (interfaces come and go) and only logged at trace.
async fn broadcast(socket: &UdpSocket, pong: &[u8]) {
    for target in broadcast_targets() {
        let destination = SocketAddr::new(IpAddr::V4(target), LAN_DISCOVERY_PORT);
        match socket.send_to(pong, destination).await {
            Ok(_) => tracing::trace!("LAN broadcast -> {destination} ({} bytes)", pong.len()),
            Err(e) => tracing::trace!("LAN broadcast to {destination} failed: {e}"),
        }
    }
}

/// The global broadcast address plus every up, non-loopback interface's
/// directed broadcast address.
fn broadcast_targets() -> Vec<Ipv4Addr> {
    let mut targets = vec![Ipv4Addr::BROADCAST];
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            for interface in interfaces {
                if interface.is_loopback() {
                    continue;
                }
                if let if_addrs::IfAddr::V4(addr) = interface.addr {
                    if let Some(broadcast) = addr.broadcast {
                        if broadcast != Ipv4Addr::BROADCAST && !targets.contains(&broadcast) {
                            targets.push(broadcast);
                        }
                    }
                }
            }
        }
        Err(e) => tracing::warn!("could not enumerate network interfaces: {e}"),
    }
    targets
}
