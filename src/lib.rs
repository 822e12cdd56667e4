//! Transparent proxy for Minecraft Bedrock Edition.
//!
//! The proxied connection looks like this:
//! Bedrock client => RakNet listener (this proxy) => RakNet client => remote Bedrock server
//!
//! # Proxying process
//! A client connects to the proxy's RakNet listener. The proxy answers the
//! client's network-settings negotiation itself, captures the login
//! envelope, and only then opens a matching RakNet connection to the
//! configured remote server. The deferred login is replayed there, the
//! server's encryption handshake passes through to the client verbatim
//! (with the proxy acknowledging it downstream so the server is satisfied),
//! and once the server reports login success the session degenerates into
//! bidirectional passthrough.
//!
//! The proxy stays in the clear: it never decrypts or re-signs anything,
//! because the client negotiates encryption directly with the server's
//! unchanged handshake.
//!
//! # Discovery
//! A LAN advertiser broadcasts unconnected pongs to port 19132 so nearby
//! clients list the proxy as a discoverable LAN world, and discovery pings
//! are answered with the same advertisement the listener carries. The
//! advertisement mirrors the remote server's protocol and version.

pub mod advertiser;
pub mod bridge;
pub mod config;
pub mod discovery;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod wire;
