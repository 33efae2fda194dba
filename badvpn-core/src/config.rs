use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Keepalive and liveness timing shared by the dataplane crates. Mirrors the
/// constants `DataProtoDest` and `FragmentProtoAssembler` hard-code in the
/// original, made configurable per deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Interval between outgoing keepalive packets.
    pub keepalive_interval: Duration,
    /// Time without an inbound packet before a peer is considered not
    /// receiving keepalives.
    pub receive_timeout: Duration,
    /// FragmentProto reassembly slot timeout, in reactor ticks.
    pub fragment_timeout_ticks: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(15),
            receive_timeout: Duration::from_secs(60),
            fragment_timeout_ticks: 15,
        }
    }
}

/// How a configured peer's DataProto channel is carried.
///
/// `Udp` wires a `DatagramPeerIo` (SPProto-framed, so it carries a crypto
/// mode); `Tcp` wires a `StreamPeerIo` over a plain `TcpTransport`
/// (password-authenticated, PacketProto-framed, no SPProto layer — a TLS
/// transport could sit underneath it, but that's a boundary contract this
/// config doesn't reach into).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "transport")]
pub enum PeerTransport {
    ConnectUdp { bind: SocketAddr, remote: SocketAddr, crypto: CryptoMode },
    ListenUdp { bind: SocketAddr, crypto: CryptoMode },
    ConnectTcp { remote: SocketAddr, password: u64 },
    ListenTcp { bind: SocketAddr, password: u64 },
}

/// SPProto's two record formats, with the key material each one needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum CryptoMode {
    Aead { key: [u8; 32] },
    Otp { send_pad: Vec<u8>, recv_pad: Vec<u8> },
}

/// One peer's identity and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerConfig {
    pub id: u16,
    #[serde(flatten)]
    pub transport: PeerTransport,
}

/// Top-level client configuration, loaded from TOML. Individual crates
/// (peerio, dataproto, spproto) read the sub-tables relevant to them; this
/// type lives in `badvpn-core` because every binary in the workspace needs
/// it to bootstrap a [`crate::Reactor`] before anything else exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// This instance's own peer id, sent as `from_id` on every frame.
    pub local_id: u16,
    pub keepalive: KeepaliveConfig,
    /// Maximum transmission unit for the virtual network frame (the "frame
    /// MTU" DataProtoDevice and DataProtoLocalSource negotiate against).
    pub frame_mtu: usize,
    /// Local TAP/TUN-equivalent device MTU headroom reserved for the
    /// DataProto header and fragmentation overhead.
    pub max_overhead: usize,
    pub peers: Vec<PeerConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            local_id: 1,
            keepalive: KeepaliveConfig::default(),
            frame_mtu: 1472,
            max_overhead: 5,
            peers: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn from_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(Error::Io)?;
        Self::from_str(&contents)
    }
}

/// A change notification delivered by [`watch_file`].
pub enum ConfigEvent {
    Changed(ClientConfig),
    /// The file changed but no longer parses; the previous config stays in
    /// effect and the caller is only informed so it can log the failure.
    Invalid(Error),
}

/// Watches `path` for changes on a background thread, parsing on every
/// filesystem event and sending the result over `mpsc` so the owning
/// [`crate::Reactor`] can drain it from a pending job instead of taking a
/// dependency on an async runtime. The returned `Watcher` must be kept
/// alive for as long as updates are wanted; dropping it stops the watch.
pub fn watch_file(path: impl Into<PathBuf>) -> Result<(mpsc::Receiver<ConfigEvent>, Box<dyn Watcher + Send>)> {
    let path = path.into();
    let (tx, rx) = mpsc::channel();

    let watch_path = path.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_err() {
            return;
        }
        let event = match std::fs::read_to_string(&watch_path) {
            Ok(contents) => match ClientConfig::from_str(&contents) {
                Ok(cfg) => ConfigEvent::Changed(cfg),
                Err(e) => ConfigEvent::Invalid(e),
            },
            Err(e) => ConfigEvent::Invalid(Error::Io(e)),
        };
        // Receiver side is dropped once the owning component tears down;
        // a send error here just means nobody is listening any more.
        let _ = tx.send(event);
    })
    .map_err(|e| Error::config(e.to_string()))?;

    watcher
        .watch(&path, RecursiveMode::NonRecursive)
        .map_err(|e| Error::config(e.to_string()))?;

    Ok((rx, Box::new(watcher)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = ClientConfig::default();
        let text = toml::to_string(&cfg).expect("serialize");
        let parsed = ClientConfig::from_str(&text).expect("parse");
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let cfg = ClientConfig::from_str("frame_mtu = 9000\n").expect("parse");
        assert_eq!(cfg.frame_mtu, 9000);
        assert_eq!(cfg.keepalive, KeepaliveConfig::default());
    }

    #[test]
    fn peer_list_round_trips_through_toml() {
        let mut cfg = ClientConfig::default();
        cfg.peers.push(PeerConfig {
            id: 2,
            transport: PeerTransport::ConnectUdp {
                bind: "0.0.0.0:0".parse().unwrap(),
                remote: "198.51.100.7:6161".parse().unwrap(),
                crypto: CryptoMode::Aead { key: [7u8; 32] },
            },
        });
        cfg.peers.push(PeerConfig {
            id: 3,
            transport: PeerTransport::ListenTcp { bind: "0.0.0.0:6162".parse().unwrap(), password: 42 },
        });
        let text = toml::to_string(&cfg).expect("serialize");
        let parsed = ClientConfig::from_str(&text).expect("parse");
        assert_eq!(cfg, parsed);
    }
}
