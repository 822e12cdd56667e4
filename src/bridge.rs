//! The proxy singleton: owns the RakNet listener and the advertisement,
//! mirrors the remote server's version, and spawns one session per accepted
//! client.

use crate::advertiser::LanAdvertiser;
use crate::config::Config;
use crate::discovery;
use crate::peer::{Direction, RakConnector, RakPeer};
use crate::protocol::{MINECRAFT_VERSION, PROTOCOL_VERSION};
use crate::session::{Session, SessionHandle, SessionRegistry};
use crate::wire::ServerAdvertisement;
use anyhow::{anyhow, Result};
use rust_raknet::{RaknetListener, RaknetSocket};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// How long a session may take to open its downstream connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for one advertisement ping to the remote server.
const PING_TIMEOUT: Duration = Duration::from_secs(3);
/// How often the remote server's advertisement is re-mirrored so version
/// changes show up without a proxy restart.
const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

pub struct Bridge {
    config: Config,
    bind: SocketAddr,
    remote: SocketAddr,
    server_guid: u64,
    registry: Arc<SessionRegistry>,
    count_rx: watch::Receiver<usize>,
    advertisement: Arc<Mutex<ServerAdvertisement>>,
    motd_tx: watch::Sender<String>,
    motd_rx: watch::Receiver<String>,
}

impl Bridge {
    /// Validates the configuration. Unresolvable addresses are fatal here,
    /// before any socket is opened.
    pub fn new(config: Config) -> Result<Self> {
        let bind = config.bind_address()?;
        let remote = config.remote_address()?;
        let server_guid = rand::random();
        let (registry, count_rx) = SessionRegistry::new();

        let advertisement = ServerAdvertisement {
            motd: config.lan.motd.clone(),
            protocol: PROTOCOL_VERSION,
            version: MINECRAFT_VERSION.to_owned(),
            player_count: 0,
            max_players: config.max_players,
            server_guid,
            sub_motd: config.lan.sub_motd.clone(),
            game_type: "Survival".to_owned(),
            port_v4: config.proxy.port,
            port_v6: 19133,
        };
        let (motd_tx, motd_rx) = watch::channel(advertisement.to_string());

        Ok(Self {
            config,
            bind,
            remote,
            server_guid,
            registry,
            count_rx,
            advertisement: Arc::new(Mutex::new(advertisement)),
            motd_tx,
            motd_rx,
        })
    }

    /// Runs the proxy until ctrl-c, then shuts every session down.
    pub async fn start(self) -> Result<()> {
        // Mirror the remote server's advertisement before going live so
        // clients never see a "Game update required" version mismatch.
        match discovery::ping_server(self.remote, PING_TIMEOUT).await {
            Ok(remote_advert) => {
                tracing::info!(
                    "remote server is {} (protocol {}), {}/{} players",
                    remote_advert.version,
                    remote_advert.protocol,
                    remote_advert.player_count,
                    remote_advert.max_players
                );
                self.adopt_remote(&remote_advert);
            }
            Err(e) => {
                tracing::warn!("could not ping remote server, advertising defaults: {e:#}")
            }
        }

        let advertiser = if self.config.lan.enabled {
            Some(LanAdvertiser::spawn(
                self.server_guid,
                Duration::from_millis(self.config.lan.broadcast_interval_ms),
                self.motd_rx.clone(),
            ))
        } else {
            None
        };

        self.spawn_refresh_task();
        self.spawn_player_count_task();

        let mut listener = RaknetListener::bind(&self.bind)
            .await
            .map_err(|e| anyhow!("could not bind listener on {}: {e:?}", self.bind))?;
        listener
            .set_full_motd(self.motd_rx.borrow().clone())
            .map_err(|e| anyhow!("could not publish advertisement: {e:?}"))?;
        listener.listen().await;

        tracing::info!("listening for Bedrock clients on {}", self.bind);
        tracing::info!("forwarding to remote server {}", self.remote);

        let mut motd_rx = self.motd_rx.clone();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                _ = motd_rx.changed() => {
                    let motd = motd_rx.borrow_and_update().clone();
                    listener.set_full_motd(motd).ok();
                }
                accepted = listener.accept() => match accepted {
                    Ok(socket) => self.accept_session(socket),
                    Err(e) => tracing::warn!("failed to accept connection: {e:?}"),
                }
            }
        }

        self.registry.shutdown_all();
        if let Some(advertiser) = advertiser {
            advertiser.stop().await;
        }
        listener.close().await.ok();
        Ok(())
    }

    fn accept_session(&self, socket: RaknetSocket) {
        if let Ok(peer_addr) = socket.peer_addr() {
            tracing::info!("new client connecting from {peer_addr}");
        }

        let (events_tx, events_rx) = flume::unbounded();
        let (shutdown_tx, shutdown_rx) = flume::bounded(1);
        let upstream = RakPeer::spawn(socket, events_tx.clone(), Direction::Upstream);
        let connector = RakConnector {
            remote: self.remote,
            timeout: CONNECT_TIMEOUT,
        };

        let session = Session::new(upstream, connector, events_tx, Arc::clone(&self.registry));
        self.registry
            .insert(session.id(), SessionHandle::new(shutdown_tx));
        tokio::spawn(session.run(events_rx, shutdown_rx));
    }

    fn adopt_remote(&self, remote: &ServerAdvertisement) {
        let mut advert = self.advertisement.lock().unwrap();
        advert.protocol = remote.protocol;
        advert.version = remote.version.clone();
        self.motd_tx.send_replace(advert.to_string());
    }

    fn spawn_refresh_task(&self) {
        let remote = self.remote;
        let advertisement = Arc::clone(&self.advertisement);
        let motd_tx = self.motd_tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            // the startup ping already covered the first tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match discovery::ping_server(remote, PING_TIMEOUT).await {
                    Ok(fresh) => {
                        let mut advert = advertisement.lock().unwrap();
                        if advert.protocol != fresh.protocol || advert.version != fresh.version {
                            tracing::info!(
                                "remote server now reports {} (protocol {})",
                                fresh.version,
                                fresh.protocol
                            );
                            advert.protocol = fresh.protocol;
                            advert.version = fresh.version.clone();
                            motd_tx.send_replace(advert.to_string());
                        }
                    }
                    Err(e) => tracing::debug!("advertisement refresh failed: {e:#}"),
                }
            }
        });
    }

    fn spawn_player_count_task(&self) {
        let mut count_rx = self.count_rx.clone();
        let advertisement = Arc::clone(&self.advertisement);
        let motd_tx = self.motd_tx.clone();
        tokio::spawn(async move {
            while count_rx.changed().await.is_ok() {
                let players = *count_rx.borrow_and_update() as u32;
                let mut advert = advertisement.lock().unwrap();
                advert.player_count = players;
                motd_tx.send_replace(advert.to_string());
            }
        });
    }
}
