//! The peer-channel seam between the session state machine and the RakNet
//! transport.
//!
//! A peer is one reliable-ordered RakNet channel. The session only ever
//! enqueues datagrams and checks liveness; a writer task drains the queue in
//! order and a reader task feeds received datagrams into the session's event
//! channel. This keeps the state machine free of transport types (and lets
//! tests drive a session with in-memory peers).

use crate::session::SessionEvent;
use anyhow::anyhow;
use rust_raknet::{RaknetSocket, Reliability};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub trait PacketIo: Clone + Send + Sync + 'static {
    /// Enqueues one datagram for in-order delivery. Datagrams enqueued on a
    /// closed peer are silently dropped.
    fn send_datagram(&self, datagram: Vec<u8>);

    fn is_connected(&self) -> bool;

    /// Closes the peer after delivering everything already enqueued.
    /// Idempotent.
    fn close(&self);
}

/// Opens the downstream peer of a session.
pub trait Connect<P: PacketIo>: Clone + Send + Sync + 'static {
    fn connect(
        &self,
        events: flume::Sender<SessionEvent<P>>,
    ) -> impl Future<Output = anyhow::Result<P>> + Send;
}

/// Which side of the session a peer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upstream,
    Downstream,
}

enum Outbound {
    Datagram(Vec<u8>),
    Close,
}

/// A session peer backed by a live `RaknetSocket`.
#[derive(Clone)]
pub struct RakPeer {
    outbound: flume::Sender<Outbound>,
    connected: Arc<AtomicBool>,
}

impl RakPeer {
    /// Wires a socket up as a session peer: spawns the writer and reader
    /// tasks and returns the handle the session owns.
    pub fn spawn(
        socket: RaknetSocket,
        events: flume::Sender<SessionEvent<RakPeer>>,
        direction: Direction,
    ) -> Self {
        let socket = Arc::new(socket);
        let connected = Arc::new(AtomicBool::new(true));
        let (outbound_tx, outbound_rx) = flume::unbounded();

        let writer_socket = Arc::clone(&socket);
        let writer_connected = Arc::clone(&connected);
        tokio::spawn(async move {
            while let Ok(message) = outbound_rx.recv_async().await {
                match message {
                    Outbound::Datagram(datagram) => {
                        if let Err(e) = writer_socket
                            .send(&datagram, Reliability::ReliableOrdered)
                            .await
                        {
                            tracing::debug!("send on {direction:?} peer failed: {e:?}");
                            break;
                        }
                    }
                    Outbound::Close => break,
                }
            }
            writer_connected.store(false, Ordering::SeqCst);
            writer_socket.close().await.ok();
        });

        let reader_connected = Arc::clone(&connected);
        tokio::spawn(async move {
            loop {
                match socket.recv().await {
                    Ok(datagram) => {
                        let event = match direction {
                            Direction::Upstream => SessionEvent::UpstreamDatagram(datagram),
                            Direction::Downstream => SessionEvent::DownstreamDatagram(datagram),
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        reader_connected.store(false, Ordering::SeqCst);
                        let event = match direction {
                            Direction::Upstream => SessionEvent::UpstreamClosed,
                            Direction::Downstream => SessionEvent::DownstreamClosed,
                        };
                        events.send(event).ok();
                        break;
                    }
                }
            }
        });

        Self {
            outbound: outbound_tx,
            connected,
        }
    }
}

impl PacketIo for RakPeer {
    fn send_datagram(&self, datagram: Vec<u8>) {
        if self.is_connected() {
            self.outbound.send(Outbound::Datagram(datagram)).ok();
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.outbound.send(Outbound::Close).ok();
    }
}

/// Opens RakNet client connections to the configured remote server.
#[derive(Clone)]
pub struct RakConnector {
    pub remote: SocketAddr,
    pub timeout: Duration,
}

impl Connect<RakPeer> for RakConnector {
    fn connect(
        &self,
        events: flume::Sender<SessionEvent<RakPeer>>,
    ) -> impl Future<Output = anyhow::Result<RakPeer>> + Send {
        let remote = self.remote;
        let timeout = self.timeout;
        async move {
            let socket = tokio::time::timeout(timeout, RaknetSocket::connect(&remote))
                .await
                .map_err(|_| anyhow!("connecting to {remote} timed out"))?
                .map_err(|e| anyhow!("connecting to {remote} failed: {e:?}"))?;
            Ok(RakPeer::spawn(socket, events, Direction::Downstream))
        }
    }
}
