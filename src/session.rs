//! The per-client proxy session.
//!
//! A session pairs the inbound peer (the connected Bedrock client) with an
//! outbound peer (our connection to the remote server) and arbitrates the
//! login handshake between them before flipping into bulk passthrough.
//!
//! All handlers for one session run on its single driver task; cross-peer
//! signaling goes through the session's event channel, so the state machine
//! needs no locks. The `connected`/`disconnecting` latches are atomics only
//! so shutdown requested from outside the driver task stays race-free.

use crate::peer::{Connect, PacketIo};
use crate::protocol::packet::{id, Disconnect, NetworkSettings, Packet};
use crate::protocol::GameCodec;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

const DISCONNECT_REMOTE_UNREACHABLE: &str = "Could not connect to the remote server.";
const DISCONNECT_SESSION_ENDED: &str = "Proxy session ended";

/// Everything a session reacts to. Peer reader tasks and the downstream
/// connect task feed this into the driver.
pub enum SessionEvent<P> {
    UpstreamDatagram(Vec<u8>),
    UpstreamClosed,
    DownstreamConnected(P),
    DownstreamFailed(anyhow::Error),
    DownstreamDatagram(Vec<u8>),
    DownstreamClosed,
}

/// Where a session stands in the login handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Waiting for the client's network-settings request (initial).
    AwaitingNetworkSettings,
    /// Login captured; waiting for the downstream connection and the
    /// server's login/encryption dance.
    AwaitingDownstream,
    /// Bulk passthrough.
    Playing,
}

/// Entry the proxy keeps per live session, enough to request shutdown.
pub struct SessionHandle {
    shutdown: flume::Sender<()>,
}

impl SessionHandle {
    pub fn new(shutdown: flume::Sender<()>) -> Self {
        Self { shutdown }
    }
}

/// The set of live sessions, shared between the listener and the sessions
/// themselves. Removal republishes the player count.
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionHandle>,
    count: watch::Sender<usize>,
}

impl SessionRegistry {
    pub fn new() -> (Arc<Self>, watch::Receiver<usize>) {
        let (count, count_rx) = watch::channel(0);
        (
            Arc::new(Self {
                sessions: DashMap::new(),
                count,
            }),
            count_rx,
        )
    }

    pub fn insert(&self, session_id: Uuid, handle: SessionHandle) {
        self.sessions.insert(session_id, handle);
        self.count.send_replace(self.sessions.len());
    }

    /// Idempotent; only the first removal logs and republishes.
    pub fn remove(&self, session_id: &Uuid) {
        if self.sessions.remove(session_id).is_some() {
            let remaining = self.sessions.len();
            self.count.send_replace(remaining);
            tracing::info!("session {session_id} removed, {remaining} active");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Requests shutdown of every live session.
    pub fn shutdown_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().shutdown.try_send(()).ok();
        }
    }
}

/// One paired (upstream, downstream) relationship.
pub struct Session<P: PacketIo, C: Connect<P>> {
    id: Uuid,
    registry: Arc<SessionRegistry>,
    upstream: P,
    downstream: Option<P>,
    connector: C,
    events: flume::Sender<SessionEvent<P>>,
    phase: HandshakePhase,
    client_protocol: Option<i32>,
    pending_login: Option<Packet>,
    login_forwarded: bool,
    upstream_codec: GameCodec,
    downstream_codec: GameCodec,
    connected: Arc<AtomicBool>,
    disconnecting: Arc<AtomicBool>,
}

impl<P: PacketIo, C: Connect<P>> Session<P, C> {
    pub fn new(
        upstream: P,
        connector: C,
        events: flume::Sender<SessionEvent<P>>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            upstream,
            downstream: None,
            connector,
            events,
            phase: HandshakePhase::AwaitingNetworkSettings,
            client_protocol: None,
            pending_login: None,
            login_forwarded: false,
            upstream_codec: GameCodec::new(),
            downstream_codec: GameCodec::new(),
            connected: Arc::new(AtomicBool::new(false)),
            disconnecting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Drives the session until either peer is gone or shutdown is
    /// requested.
    pub async fn run(mut self, events: flume::Receiver<SessionEvent<P>>, shutdown: flume::Receiver<()>) {
        loop {
            let event = tokio::select! {
                event = events.recv_async() => match event {
                    Ok(event) => event,
                    Err(_) => break,
                },
                _ = shutdown.recv_async() => {
                    self.teardown(Some(DISCONNECT_SESSION_ENDED));
                    break;
                }
            };

            match event {
                SessionEvent::UpstreamDatagram(datagram) => self.handle_upstream_datagram(&datagram),
                SessionEvent::UpstreamClosed => self.on_upstream_disconnect(),
                SessionEvent::DownstreamConnected(peer) => self.on_downstream_connected(peer),
                SessionEvent::DownstreamFailed(error) => self.on_downstream_failed(error),
                SessionEvent::DownstreamDatagram(datagram) => {
                    self.handle_downstream_datagram(&datagram)
                }
                SessionEvent::DownstreamClosed => self.on_downstream_disconnect(),
            }

            if self.disconnecting.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    fn handle_upstream_datagram(&mut self, datagram: &[u8]) {
        let packets = match self.upstream_codec.decode_batch(datagram) {
            Ok(packets) => packets,
            Err(e) => {
                tracing::debug!("[{}] dropping malformed client batch: {e}", self.id);
                return;
            }
        };

        match self.phase {
            HandshakePhase::AwaitingNetworkSettings => {
                for packet in packets {
                    self.handle_pre_login_packet(packet);
                }
            }
            HandshakePhase::AwaitingDownstream => {
                for packet in packets {
                    if packet.id() == id::LOGIN {
                        tracing::warn!("[{}] duplicate login ignored", self.id);
                    } else {
                        tracing::debug!(
                            "[{}] dropping client packet {:#04x} sent before login completed",
                            self.id,
                            packet.id()
                        );
                    }
                }
            }
            HandshakePhase::Playing => self.send_downstream(&packets),
        }
    }

    fn handle_pre_login_packet(&mut self, packet: Packet) {
        match &packet {
            Packet::RequestNetworkSettings(request) => {
                tracing::debug!(
                    "[{}] client requested network settings (protocol {})",
                    self.id,
                    request.protocol_version
                );
                self.client_protocol = Some(request.protocol_version);
                self.send_upstream(&[Packet::NetworkSettings(NetworkSettings::proxy_defaults())]);
                self.upstream_codec.enable_framing();
            }
            _ if packet.id() == id::LOGIN => {
                // the phase may have advanced earlier in this same batch
                if self.phase != HandshakePhase::AwaitingNetworkSettings {
                    tracing::warn!("[{}] login received out of phase, ignoring", self.id);
                    return;
                }
                tracing::info!(
                    "[{}] client login received (protocol {:?}), connecting to remote server",
                    self.id,
                    self.client_protocol
                );
                self.pending_login = Some(packet);
                self.phase = HandshakePhase::AwaitingDownstream;
                self.start_downstream_connect();
            }
            _ => tracing::trace!(
                "[{}] dropping unexpected pre-login packet {:#04x}",
                self.id,
                packet.id()
            ),
        }
    }

    fn start_downstream_connect(&self) {
        let connector = self.connector.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let event = match connector.connect(events.clone()).await {
                Ok(peer) => SessionEvent::DownstreamConnected(peer),
                Err(error) => SessionEvent::DownstreamFailed(error),
            };
            events.send(event).ok();
        });
    }

    fn on_downstream_connected(&mut self, peer: P) {
        if self.disconnecting.load(Ordering::SeqCst) {
            peer.close();
            return;
        }

        self.connected.store(true, Ordering::SeqCst);
        self.downstream = Some(peer);

        if self.login_forwarded {
            return;
        }
        if let Some(login) = self.pending_login.take() {
            self.login_forwarded = true;
            tracing::info!("[{}] forwarding login to remote server", self.id);
            self.send_downstream(&[login]);
        }
    }

    fn on_downstream_failed(&mut self, error: anyhow::Error) {
        tracing::error!(
            "[{}] failed to connect to remote server: {error:#}",
            self.id
        );
        self.teardown(Some(DISCONNECT_REMOTE_UNREACHABLE));
    }

    fn handle_downstream_datagram(&mut self, datagram: &[u8]) {
        let packets = match self.downstream_codec.decode_batch(datagram) {
            Ok(packets) => packets,
            Err(e) => {
                tracing::debug!("[{}] dropping malformed server batch: {e}", self.id);
                return;
            }
        };

        let mut to_client = Vec::with_capacity(packets.len());
        let mut teardown = false;
        for packet in packets {
            match packet.id() {
                id::NETWORK_SETTINGS => {
                    tracing::debug!("[{}] server network settings passed through", self.id);
                    to_client.push(packet);
                    self.downstream_codec.enable_framing();
                }
                id::SERVER_TO_CLIENT_HANDSHAKE => {
                    tracing::debug!(
                        "[{}] server requested encryption, completing its handshake",
                        self.id
                    );
                    to_client.push(packet);
                    self.send_downstream(&[Packet::ClientToServerHandshake]);
                }
                id::PLAY_STATUS => {
                    let completes_login = matches!(
                        &packet,
                        Packet::PlayStatus(status) if status.completes_login()
                    );
                    to_client.push(packet);
                    if completes_login && self.phase != HandshakePhase::Playing {
                        tracing::info!("[{}] login complete, passthrough active", self.id);
                        self.phase = HandshakePhase::Playing;
                    }
                }
                id::DISCONNECT => {
                    tracing::info!("[{}] remote server disconnected the player", self.id);
                    to_client.push(packet);
                    teardown = true;
                }
                _ => to_client.push(packet),
            }
        }

        if !to_client.is_empty() {
            self.send_upstream(&to_client);
        }
        if teardown {
            self.teardown(None);
        }
    }

    fn on_upstream_disconnect(&mut self) {
        tracing::info!("[{}] client disconnected", self.id);
        self.teardown(None);
    }

    fn on_downstream_disconnect(&mut self) {
        tracing::info!("[{}] remote server closed the connection", self.id);
        self.teardown(Some(DISCONNECT_SESSION_ENDED));
    }

    fn send_upstream(&self, packets: &[Packet]) {
        if !self.upstream.is_connected() {
            return;
        }
        self.upstream
            .send_datagram(self.upstream_codec.encode_batch(packets));
    }

    fn send_downstream(&self, packets: &[Packet]) {
        let Some(downstream) = &self.downstream else {
            return;
        };
        if !downstream.is_connected() {
            return;
        }
        downstream.send_datagram(self.downstream_codec.encode_batch(packets));
    }

    /// Tears both peers down and deregisters the session. Safe to call more
    /// than once. A reason, when given, is delivered to the client as a
    /// disconnect message before its channel closes.
    fn teardown(&mut self, upstream_reason: Option<&str>) {
        if self.disconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.pending_login = None;

        if let Some(downstream) = self.downstream.take() {
            downstream.close();
        }
        if self.upstream.is_connected() {
            if let Some(reason) = upstream_reason {
                self.upstream.send_datagram(
                    self.upstream_codec
                        .encode_batch(&[Packet::Disconnect(Disconnect::with_message(reason))]),
                );
            }
            self.upstream.close();
        }
        self.registry.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::{PlayStatus, RawPacket, RequestNetworkSettings};
    use crate::protocol::{Decode, Decoder};
    use std::future::Future;
    use std::time::Duration;

    #[derive(Clone)]
    struct MockPeer {
        sent: flume::Sender<Vec<u8>>,
        connected: Arc<AtomicBool>,
    }

    impl MockPeer {
        fn new() -> (Self, flume::Receiver<Vec<u8>>) {
            let (sent, received) = flume::unbounded();
            (
                Self {
                    sent,
                    connected: Arc::new(AtomicBool::new(true)),
                },
                received,
            )
        }
    }

    impl PacketIo for MockPeer {
        fn send_datagram(&self, datagram: Vec<u8>) {
            if self.is_connected() {
                self.sent.send(datagram).ok();
            }
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn close(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    #[derive(Clone)]
    enum MockConnector {
        Succeed(MockPeer),
        Fail,
    }

    impl Connect<MockPeer> for MockConnector {
        fn connect(
            &self,
            _events: flume::Sender<SessionEvent<MockPeer>>,
        ) -> impl Future<Output = anyhow::Result<MockPeer>> + Send {
            let connector = self.clone();
            async move {
                match connector {
                    MockConnector::Succeed(peer) => Ok(peer),
                    MockConnector::Fail => Err(anyhow::anyhow!("connection refused")),
                }
            }
        }
    }

    struct Harness {
        events: flume::Sender<SessionEvent<MockPeer>>,
        shutdown: flume::Sender<()>,
        client_rx: flume::Receiver<Vec<u8>>,
        server_rx: flume::Receiver<Vec<u8>>,
        upstream: MockPeer,
        downstream: MockPeer,
        registry: Arc<SessionRegistry>,
        driver: tokio::task::JoinHandle<()>,
        /// Mirrors the client's view of the upstream link.
        client_codec: GameCodec,
        /// Mirrors the server's view of the downstream link.
        server_codec: GameCodec,
    }

    fn request_network_settings() -> Packet {
        Packet::RequestNetworkSettings(RequestNetworkSettings {
            protocol_version: 729,
        })
    }

    fn login_packet() -> Packet {
        Packet::Raw(RawPacket::new(id::LOGIN, b"\x00\x00\x02\xd9stub-chain".to_vec()))
    }

    fn play_status(status: i32) -> Packet {
        Packet::PlayStatus(PlayStatus { status })
    }

    async fn recv_batch(rx: &flume::Receiver<Vec<u8>>, codec: &GameCodec) -> Vec<Packet> {
        let datagram = tokio::time::timeout(Duration::from_secs(1), rx.recv_async())
            .await
            .expect("timed out waiting for a datagram")
            .expect("peer channel closed");
        codec.decode_batch(&datagram).expect("malformed batch")
    }

    async fn expect_silence(rx: &flume::Receiver<Vec<u8>>) {
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv_async())
                .await
                .is_err(),
            "unexpected datagram"
        );
    }

    /// Builds a session driven through its event loop, with mirrored codecs
    /// for both fake endpoints.
    fn start(connector_kind: ConnectorKind) -> Harness {
        let (upstream, client_rx) = MockPeer::new();
        let (downstream, server_rx) = MockPeer::new();
        let connector = match connector_kind {
            ConnectorKind::Succeed => MockConnector::Succeed(downstream.clone()),
            ConnectorKind::Fail => MockConnector::Fail,
        };

        let (events_tx, events_rx) = flume::unbounded();
        let (shutdown_tx, shutdown_rx) = flume::bounded(1);
        let (registry, _count_rx) = SessionRegistry::new();

        let session = Session::new(
            upstream.clone(),
            connector,
            events_tx.clone(),
            Arc::clone(&registry),
        );
        registry.insert(session.id(), SessionHandle::new(shutdown_tx.clone()));
        let driver = tokio::spawn(session.run(events_rx, shutdown_rx));

        Harness {
            events: events_tx,
            shutdown: shutdown_tx,
            client_rx,
            server_rx,
            upstream,
            downstream,
            registry,
            driver,
            client_codec: GameCodec::new(),
            server_codec: GameCodec::new(),
        }
    }

    enum ConnectorKind {
        Succeed,
        Fail,
    }

    impl Harness {
        fn send_from_client(&self, packets: &[Packet]) {
            self.events
                .send(SessionEvent::UpstreamDatagram(
                    self.client_codec.encode_batch(packets),
                ))
                .unwrap();
        }

        fn send_from_server(&self, packets: &[Packet]) {
            self.events
                .send(SessionEvent::DownstreamDatagram(
                    self.server_codec.encode_batch(packets),
                ))
                .unwrap();
        }

        /// Drives the handshake through network settings and login, leaving
        /// the session waiting on the server's login response.
        async fn complete_client_handshake(&mut self) {
            self.send_from_client(&[request_network_settings()]);
            let reply = recv_batch(&self.client_rx, &self.client_codec).await;
            assert!(matches!(reply[0], Packet::Raw(ref raw) if raw.id() == id::NETWORK_SETTINGS));
            self.client_codec.enable_framing();

            self.send_from_client(&[login_packet()]);
            let forwarded = recv_batch(&self.server_rx, &self.server_codec).await;
            assert_eq!(forwarded, vec![login_packet()]);
        }
    }

    #[tokio::test]
    async fn cleartext_passthrough_flow() {
        let mut harness = start(ConnectorKind::Succeed);
        harness.complete_client_handshake().await;

        // server confirms the login; client must see it verbatim
        harness.send_from_server(&[play_status(PlayStatus::LOGIN_SUCCESS)]);
        let to_client = recv_batch(&harness.client_rx, &harness.client_codec).await;
        assert_eq!(to_client, vec![play_status(PlayStatus::LOGIN_SUCCESS)]);

        // passthrough: a Text packet relays byte-identically
        let text = Packet::Raw(RawPacket::new(0x09, b"\x00hi".to_vec()));
        harness.send_from_client(&[text.clone()]);
        let relayed = recv_batch(&harness.server_rx, &harness.server_codec).await;
        assert_eq!(relayed, vec![text]);

        // and the reverse direction
        let pong = Packet::Raw(RawPacket::new(0x8C, vec![7, 7, 7]));
        harness.send_from_server(&[pong.clone()]);
        let relayed = recv_batch(&harness.client_rx, &harness.client_codec).await;
        assert_eq!(relayed, vec![pong]);
    }

    #[tokio::test]
    async fn login_is_forwarded_exactly_once() {
        let mut harness = start(ConnectorKind::Succeed);
        harness.complete_client_handshake().await;

        // a duplicate connected notification must not replay the login
        harness
            .events
            .send(SessionEvent::DownstreamConnected(harness.downstream.clone()))
            .unwrap();
        // neither must a duplicate login from the client
        harness.send_from_client(&[login_packet()]);

        expect_silence(&harness.server_rx).await;
    }

    #[tokio::test]
    async fn encryption_handshake_passes_through_and_acknowledges() {
        let mut harness = start(ConnectorKind::Succeed);
        harness.complete_client_handshake().await;

        let jwt = Packet::Raw(RawPacket::new(
            id::SERVER_TO_CLIENT_HANDSHAKE,
            b"\x03abc".to_vec(),
        ));
        harness.send_from_server(&[jwt.clone()]);

        // the client sees the server handshake unchanged
        let to_client = recv_batch(&harness.client_rx, &harness.client_codec).await;
        assert_eq!(to_client, vec![jwt]);

        // and the server receives the empty acknowledgement
        let to_server = recv_batch(&harness.server_rx, &harness.server_codec).await;
        assert_eq!(to_server[0].id(), id::CLIENT_TO_SERVER_HANDSHAKE);
    }

    #[tokio::test]
    async fn failed_downstream_connect_disconnects_the_client() {
        let mut harness = start(ConnectorKind::Fail);
        harness.send_from_client(&[request_network_settings()]);
        let _settings = recv_batch(&harness.client_rx, &harness.client_codec).await;
        harness.client_codec.enable_framing();
        harness.send_from_client(&[login_packet()]);

        let notice = recv_batch(&harness.client_rx, &harness.client_codec).await;
        match &notice[0] {
            Packet::Raw(raw) if raw.id() == id::DISCONNECT => {
                let disconnect = Disconnect::decode(&mut Decoder::new(&raw.body)).unwrap();
                assert!(disconnect
                    .message
                    .as_deref()
                    .unwrap()
                    .contains("Could not connect to the remote server"));
            }
            other => panic!("expected a disconnect, got {other:?}"),
        }

        tokio::time::timeout(Duration::from_secs(1), harness.driver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(harness.registry.len(), 0);
        assert!(!harness.upstream.is_connected());
    }

    #[tokio::test]
    async fn upstream_close_tears_down_the_downstream() {
        let mut harness = start(ConnectorKind::Succeed);
        harness.complete_client_handshake().await;
        harness.send_from_server(&[play_status(PlayStatus::LOGIN_SUCCESS)]);
        let _ = recv_batch(&harness.client_rx, &harness.client_codec).await;

        harness.events.send(SessionEvent::UpstreamClosed).unwrap();
        tokio::time::timeout(Duration::from_secs(1), harness.driver)
            .await
            .unwrap()
            .unwrap();

        assert!(!harness.downstream.is_connected());
        assert_eq!(harness.registry.len(), 0);
    }

    #[tokio::test]
    async fn server_disconnect_is_forwarded_then_torn_down() {
        let mut harness = start(ConnectorKind::Succeed);
        harness.complete_client_handshake().await;

        let kick = Packet::Raw(RawPacket::new(id::DISCONNECT, vec![0, 0]));
        harness.send_from_server(&[kick.clone()]);

        let to_client = recv_batch(&harness.client_rx, &harness.client_codec).await;
        assert_eq!(to_client, vec![kick]);

        tokio::time::timeout(Duration::from_secs(1), harness.driver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(harness.registry.len(), 0);
        assert!(!harness.downstream.is_connected());
    }

    #[tokio::test]
    async fn shutdown_request_disconnects_both_peers() {
        let mut harness = start(ConnectorKind::Succeed);
        harness.complete_client_handshake().await;

        harness.shutdown.try_send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), harness.driver)
            .await
            .unwrap()
            .unwrap();

        assert!(!harness.upstream.is_connected());
        assert!(!harness.downstream.is_connected());
        assert_eq!(harness.registry.len(), 0);
    }

    #[tokio::test]
    async fn phase_is_monotonic() {
        let (upstream, _client_rx) = MockPeer::new();
        let (downstream, _server_rx) = MockPeer::new();
        let (events_tx, _events_rx) = flume::unbounded();
        let (registry, _count_rx) = SessionRegistry::new();
        let mut session = Session::new(
            upstream,
            MockConnector::Succeed(downstream.clone()),
            events_tx,
            registry,
        );
        let mut client_codec = GameCodec::new();
        let server_codec = GameCodec::new();

        assert_eq!(session.phase(), HandshakePhase::AwaitingNetworkSettings);

        session.handle_upstream_datagram(&client_codec.encode_batch(&[request_network_settings()]));
        assert_eq!(session.phase(), HandshakePhase::AwaitingNetworkSettings);
        client_codec.enable_framing();

        session.handle_upstream_datagram(&client_codec.encode_batch(&[login_packet()]));
        assert_eq!(session.phase(), HandshakePhase::AwaitingDownstream);

        session.on_downstream_connected(downstream);

        // a non-success status forwards but does not advance
        session.handle_downstream_datagram(&server_codec.encode_batch(&[play_status(1)]));
        assert_eq!(session.phase(), HandshakePhase::AwaitingDownstream);

        session.handle_downstream_datagram(
            &server_codec.encode_batch(&[play_status(PlayStatus::PLAYER_SPAWN)]),
        );
        assert_eq!(session.phase(), HandshakePhase::Playing);

        // nothing moves the phase backwards
        session.handle_downstream_datagram(&server_codec.encode_batch(&[play_status(1)]));
        assert_eq!(session.phase(), HandshakePhase::Playing);
    }

    #[tokio::test]
    async fn second_login_in_the_same_batch_is_ignored() {
        let (upstream, _client_rx) = MockPeer::new();
        let (downstream, _server_rx) = MockPeer::new();
        let (events_tx, _events_rx) = flume::unbounded();
        let (registry, _count_rx) = SessionRegistry::new();
        let mut session = Session::new(
            upstream,
            MockConnector::Succeed(downstream),
            events_tx,
            registry,
        );
        let mut client_codec = GameCodec::new();

        session.handle_upstream_datagram(&client_codec.encode_batch(&[request_network_settings()]));
        client_codec.enable_framing();

        let first = Packet::Raw(RawPacket::new(id::LOGIN, b"first".to_vec()));
        let second = Packet::Raw(RawPacket::new(id::LOGIN, b"second".to_vec()));
        session.handle_upstream_datagram(&client_codec.encode_batch(&[first.clone(), second]));

        assert_eq!(session.phase(), HandshakePhase::AwaitingDownstream);
        assert_eq!(session.pending_login, Some(first));
    }

    #[tokio::test]
    async fn upstream_close_with_pending_login_forwards_nothing() {
        let (upstream, _client_rx) = MockPeer::new();
        let (downstream, server_rx) = MockPeer::new();
        let (events_tx, _events_rx) = flume::unbounded();
        let (registry, _count_rx) = SessionRegistry::new();
        let mut session = Session::new(
            upstream,
            MockConnector::Succeed(downstream.clone()),
            events_tx,
            Arc::clone(&registry),
        );
        registry.insert(session.id(), SessionHandle::new(flume::bounded(1).0));
        let mut client_codec = GameCodec::new();

        session.handle_upstream_datagram(&client_codec.encode_batch(&[request_network_settings()]));
        client_codec.enable_framing();
        session.handle_upstream_datagram(&client_codec.encode_batch(&[login_packet()]));

        // client vanishes before the downstream ever came up
        session.on_upstream_disconnect();
        assert_eq!(registry.len(), 0);

        // the late connect must not receive the login and gets closed
        session.on_downstream_connected(downstream.clone());
        assert!(server_rx.try_recv().is_err());
        assert!(!downstream.is_connected());
    }
}
