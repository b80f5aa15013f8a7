// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DOTS broker daemon
//!
//! Accepts guest connections over TCP and routes typed records between them:
//! - Handshake and optional shared-secret authentication
//! - Group membership (one group per type) with cache snapshots on join
//! - Client directory and periodic daemon status
//!
//! # Usage
//!
//! ```bash
//! # Start on the default endpoint (127.0.0.1:11234)
//! dotsd
//!
//! # Listen on all interfaces, custom name
//! dotsd --address 0.0.0.0 --port 12000 -n plant-broker
//!
//! # Detach from the terminal
//! dotsd -d --config /etc/dotsd.json
//! ```

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{info, Level};

mod config;
mod server;

pub use config::ServerConfig;
pub use server::Broker;

/// DOTS broker daemon - routes typed records between guests
#[derive(Parser, Debug)]
#[command(name = "dotsd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen address
    #[arg(short, long)]
    address: Option<IpAddr>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Broker name sent to guests
    #[arg(short = 'n', long)]
    server_name: Option<String>,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run as a background daemon
    #[arg(short, long)]
    daemon: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Forward updates back to their publisher
    #[arg(long)]
    echo: bool,
}

impl Args {
    /// Command line values override the file.
    fn into_config(self) -> Result<ServerConfig, config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(address) = self.address {
            config.bind_address = address;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(name) = self.server_name {
            config.server_name = name;
        }
        if self.echo {
            config.echo_to_origin = true;
        }
        config.validate()?;
        Ok(config)
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    // Also installs the `log` bridge for the library's records.
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()?;

    let daemon = args.daemon;
    if let Some(path) = &args.config {
        info!("Loading config from {:?}", path);
    }
    let config = args.into_config()?;

    if daemon {
        daemonize()?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config))
}

async fn run(config: ServerConfig) -> Result<(), BoxError> {
    info!("+----------------------------------------------------+");
    info!("|       DOTS broker daemon v{:24} |", env!("CARGO_PKG_VERSION"));
    info!("+----------------------------------------------------+");
    info!("|  Name:   {:40} |", config.server_name);
    info!("|  Bind:   {:40} |", config.listen_address());
    info!(
        "|  Echo:   {:40} |",
        if config.echo_to_origin { "enabled" } else { "disabled" }
    );
    info!(
        "|  Auth:   {:40} |",
        if config.auth_secret.is_some() { "shared secret" } else { "none" }
    );
    info!("+----------------------------------------------------+");

    let broker = Broker::new(config)?;

    let broker_handle = broker.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping broker...");
        broker_handle.shutdown();
    });

    broker.run().await?;

    info!("Broker stopped");
    Ok(())
}

/// Detach from the controlling terminal. Must run before the runtime
/// spawns its worker threads.
#[cfg(unix)]
fn daemonize() -> std::io::Result<()> {
    // SAFETY: no other threads exist yet; daemon(3) forks and the child continues.
    let rc = unsafe { libc::daemon(1, 0) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn daemonize() -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "daemon mode is only available on unix",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_defaults() {
        let args = Args::parse_from(["dotsd", "--port", "4000", "-n", "edge", "--echo"]);
        let config = args.into_config().unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.server_name, "edge");
        assert!(config.echo_to_origin);
        assert_eq!(config.bind_address.to_string(), "127.0.0.1");
    }

    #[test]
    fn test_args_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dotsd.json");
        std::fs::write(&path, r#"{"port": 5000, "server_name": "from-file"}"#).unwrap();

        let args = Args::parse_from([
            "dotsd",
            "--config",
            path.to_str().unwrap(),
            "--address",
            "0.0.0.0",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.server_name, "from-file");
        assert_eq!(config.bind_address.to_string(), "0.0.0.0");
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = Args::parse_from(["dotsd", "--port", "0"]);
        assert!(args.into_config().is_err());
    }
}
