//! Configuration, loaded from `config.yml` in the working directory.
//! A commented default file is written on first run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.yml";

const DEFAULT_CONFIG: &str = r#"# The address/port the proxy listens on. Bedrock clients connect here.
proxy:
  bind-address: "0.0.0.0"
  port: 19150

# The real Bedrock server to forward players to.
remote:
  address: "127.0.0.1"
  port: 19132

# LAN discovery: makes the proxy show up as a LAN world in the
# client's Play > Worlds tab.
lan:
  enabled: true
  motd: "Bedrock Proxy"
  sub-motd: "Proxied world"
  broadcast-interval-ms: 1500

# Max players shown in the server listing.
max-players: 20

# Verbose debug logging.
debug-logging: false
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub proxy: ProxySection,
    pub remote: RemoteSection,
    pub lan: LanSection,
    pub max_players: u32,
    pub debug_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy: ProxySection::default(),
            remote: RemoteSection::default(),
            lan: LanSection::default(),
            max_players: 20,
            debug_logging: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProxySection {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RemoteSection {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LanSection {
    pub enabled: bool,
    pub motd: String,
    pub sub_motd: String,
    pub broadcast_interval_ms: u64,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_owned(),
            // off the default Bedrock port so a co-resident BDS can keep 19132
            port: 19150,
        }
    }
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_owned(),
            port: 19132,
        }
    }
}

impl Default for LanSection {
    fn default() -> Self {
        Self {
            enabled: true,
            motd: "Bedrock Proxy".to_owned(),
            sub_motd: "Proxied world".to_owned(),
            broadcast_interval_ms: 1500,
        }
    }
}

impl Config {
    /// Loads `config.yml` from `directory`, writing the commented default
    /// file first if none exists. Returns the path actually read alongside
    /// the configuration.
    pub fn load(directory: &Path) -> Result<(Self, PathBuf)> {
        let path = directory.join(CONFIG_FILE);
        if !path.exists() {
            std::fs::write(&path, DEFAULT_CONFIG)
                .with_context(|| format!("writing default config to {}", path.display()))?;
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok((config, path))
    }

    pub fn bind_address(&self) -> Result<SocketAddr> {
        resolve(&self.proxy.bind_address, self.proxy.port)
    }

    pub fn remote_address(&self) -> Result<SocketAddr> {
        resolve(&self.remote.address, self.remote.port)
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("could not resolve {host}:{port}"))?
        .next()
        .with_context(|| format!("{host}:{port} resolved to no addresses"))
}
