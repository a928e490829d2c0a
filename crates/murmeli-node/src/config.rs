//! On-disk node configuration and data directory layout.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use murmeli_protocol::ProtocolConfig;
use murmeli_transport::{PeerId, TransportConfig};
use serde::{Deserialize, Serialize};

/// Files kept under one data directory.
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn keyring(&self) -> PathBuf {
        self.root.join("keyring.json")
    }

    pub fn database(&self) -> PathBuf {
        self.root.join("murmeli.db")
    }
}

/// Who this node is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: PeerId,
    pub name: String,
}

/// Transport settings as written in `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub listen_addr: SocketAddr,
    pub socks_proxy: Option<SocketAddr>,
    pub onion_port: u16,
    pub max_frame_size: usize,
    /// Fixed addresses for peers reachable without the proxy.
    pub peers: BTreeMap<PeerId, SocketAddr>,
}

impl Default for TransportSection {
    fn default() -> Self {
        let defaults = TransportConfig::new();
        Self {
            listen_addr: defaults.get_listen_addr(),
            socks_proxy: None,
            onion_port: murmeli_transport::DEFAULT_ONION_PORT,
            max_frame_size: defaults.get_max_frame_size(),
            peers: BTreeMap::new(),
        }
    }
}

impl TransportSection {
    /// Build the transport config; the environment still overrides the
    /// proxy address.
    pub fn to_config(&self) -> TransportConfig {
        let mut config = TransportConfig::new()
            .listen_addr(self.listen_addr)
            .onion_port(self.onion_port)
            .max_frame_size(self.max_frame_size);
        if config.get_socks_proxy().is_none() {
            if let Some(proxy) = self.socks_proxy {
                config = config.socks_proxy(proxy);
            }
        }
        for (peer, addr) in &self.peers {
            config = config.static_peer(peer.clone(), *addr);
        }
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub identity: Identity,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub transport: TransportSection,
}

impl NodeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {} (run `murmeli init` first)", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("cannot write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_gets_defaults() {
        let config: NodeConfig =
            serde_json::from_str(r#"{"identity":{"id":"alicealicealicea","name":"Alice"}}"#).unwrap();
        assert_eq!(config.identity.name, "Alice");
        assert!(config.protocol.allow_unsolicited_requests);
        assert_eq!(config.transport.onion_port, murmeli_transport::DEFAULT_ONION_PORT);
        assert!(config.transport.peers.is_empty());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        let mut config: NodeConfig =
            serde_json::from_str(r#"{"identity":{"id":"alicealicealicea","name":"Alice"}}"#).unwrap();
        config
            .transport
            .peers
            .insert("bobbobbobbobbobb".parse().unwrap(), "127.0.0.1:4000".parse().unwrap());
        config.save(&data.config()).unwrap();

        let loaded = NodeConfig::load(&data.config()).unwrap();
        assert_eq!(loaded.identity.id, config.identity.id);
        assert_eq!(loaded.transport.peers, config.transport.peers);
    }

    #[test]
    fn static_peers_reach_transport() {
        let mut section = TransportSection::default();
        section
            .peers
            .insert("bobbobbobbobbobb".parse().unwrap(), "127.0.0.1:4000".parse().unwrap());
        section.max_frame_size = 4096;
        let config = section.to_config();
        assert_eq!(config.get_max_frame_size(), 4096);
    }
}
