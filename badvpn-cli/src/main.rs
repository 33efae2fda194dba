#![forbid(unsafe_code)]

//! Operator-facing companion to `badvpn-client`: validates a config file and
//! prints a summary of what it declares, without needing a running reactor
//! or any control-plane connection to one. There is no daemon RPC surface in
//! this workspace for `status` to query live state from — a peer showing up
//! here means it's configured, not that its `DataProtoDest` is currently up.

use std::path::PathBuf;

use anyhow::{Context, Result};
use badvpn_core::{ClientConfig, PeerTransport};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a config file and report whether it's valid.
    ConfigCheck {
        /// Path to the TOML configuration file.
        path: PathBuf,
    },
    /// Print a table of the peers a config file declares.
    Status {
        /// Path to the TOML configuration file.
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::ConfigCheck { path } => config_check(&path),
        Commands::Status { path } => status(&path),
    }
}

fn config_check(path: &PathBuf) -> Result<()> {
    let config = ClientConfig::load(path).with_context(|| format!("loading {}", path.display()))?;
    println!("{} is valid: local_id={}, {} peer(s)", path.display(), config.local_id, config.peers.len());
    Ok(())
}

fn status(path: &PathBuf) -> Result<()> {
    let config = ClientConfig::load(path).with_context(|| format!("loading {}", path.display()))?;

    println!("local_id: {}", config.local_id);
    println!("frame_mtu: {}", config.frame_mtu);

    let mut table = Table::new();
    table.set_header(vec!["peer", "transport", "address", "crypto"]);
    for peer in &config.peers {
        let (transport, address, crypto) = describe_transport(&peer.transport);
        table.add_row(vec![
            Cell::new(peer.id),
            Cell::new(transport),
            Cell::new(address),
            Cell::new(crypto),
        ]);
    }
    println!("{table}");

    Ok(())
}

fn describe_transport(transport: &PeerTransport) -> (&'static str, String, &'static str) {
    match transport {
        PeerTransport::ConnectUdp { bind, remote, crypto } => {
            ("connect-udp", format!("{bind} -> {remote}"), crypto_name(crypto))
        }
        PeerTransport::ListenUdp { bind, crypto } => ("listen-udp", bind.to_string(), crypto_name(crypto)),
        PeerTransport::ConnectTcp { remote, .. } => ("connect-tcp", remote.to_string(), "password"),
        PeerTransport::ListenTcp { bind, .. } => ("listen-tcp", bind.to_string(), "password"),
    }
}

fn crypto_name(crypto: &badvpn_core::CryptoMode) -> &'static str {
    match crypto {
        badvpn_core::CryptoMode::Aead { .. } => "aead",
        badvpn_core::CryptoMode::Otp { .. } => "otp",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use badvpn_core::{CryptoMode, PeerConfig};

    #[test]
    fn describes_each_transport_kind() {
        let (kind, addr, crypto) = describe_transport(&PeerTransport::ConnectUdp {
            bind: "0.0.0.0:0".parse().unwrap(),
            remote: "198.51.100.7:6161".parse().unwrap(),
            crypto: CryptoMode::Aead { key: [0u8; 32] },
        });
        assert_eq!(kind, "connect-udp");
        assert!(addr.contains("198.51.100.7:6161"));
        assert_eq!(crypto, "aead");

        let (kind, _, crypto) =
            describe_transport(&PeerTransport::ListenTcp { bind: "0.0.0.0:6162".parse().unwrap(), password: 1 });
        assert_eq!(kind, "listen-tcp");
        assert_eq!(crypto, "password");
    }

    #[test]
    fn config_check_rejects_malformed_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "frame_mtu = [not valid").unwrap();
        assert!(config_check(&path).is_err());
    }

    #[test]
    fn config_check_accepts_default_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("good.toml");
        std::fs::write(&path, "local_id = 3\n").unwrap();
        assert!(config_check(&path).is_ok());
    }

    #[test]
    fn status_runs_against_a_config_with_peers() {
        let mut config = ClientConfig::default();
        config.peers.push(PeerConfig {
            id: 2,
            transport: PeerTransport::ConnectUdp {
                bind: "0.0.0.0:0".parse().unwrap(),
                remote: "198.51.100.7:6161".parse().unwrap(),
                crypto: CryptoMode::Aead { key: [0u8; 32] },
            },
        });
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("status.toml");
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();
        assert!(status(&path).is_ok());
    }
}
