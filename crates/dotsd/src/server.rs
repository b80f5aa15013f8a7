// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker event loop.
//!
//! One actor owns the [`HostTransceiver`]. Reader tasks (one per socket)
//! forward decoded frames over an mpsc channel; outbound frames go through
//! each connection's [`TcpChannel`] writer task, so the actor never blocks
//! on a socket. A failed writer is reported on the same channel as a failed
//! reader.
//!
//! ```text
//! listener ──accept──┐
//! reader tasks ──────┼──> actor (HostTransceiver) ──> TcpChannel ──> writer tasks
//! timers / ctrl-c ───┘
//! ```

use crate::config::{ConfigError, ServerConfig};
use dots::io::tcp::{self, FrameReader};
use dots::io::{ChannelError, ConnectionKey, HostTransceiver, SecretAuthManager, TransceiverError};
use dots::protocol::RawFrame;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What a reader or writer task reports to the actor.
#[derive(Debug)]
enum Inbound {
    Frame {
        key: ConnectionKey,
        frame: RawFrame,
        size: usize,
    },
    Error {
        key: ConnectionKey,
        error: ChannelError,
    },
}

/// Broker daemon.
#[derive(Clone)]
pub struct Broker {
    config: Arc<ServerConfig>,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl Broker {
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Ask the event loop to stop. Safe to call before `run` reaches its loop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Bind the configured address and serve until shut down.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = self.config.listen_address();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve(listener).await
    }

    /// Serve guests accepted on `listener` until shut down.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }
        if let Ok(addr) = listener.local_addr() {
            info!("Broker '{}' listening on {}", self.config.server_name, addr);
        }

        let result = self.event_loop(listener).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn event_loop(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut host = HostTransceiver::new(self.config.host_config())?;
        if let Some(secret) = &self.config.auth_secret {
            host = host.with_auth(Box::new(SecretAuthManager::new(secret.clone())));
            info!("Guest authentication enabled");
        }

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Inbound>();
        let mut readers: HashMap<ConnectionKey, JoinHandle<()>> = HashMap::new();
        let mut housekeeping = tokio::time::interval(self.config.housekeeping_interval());
        let mut status = tokio::time::interval(self.config.status_interval());

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            if let Some((key, reader, writer)) = self.accept(&mut host, stream, peer) {
                                readers.insert(key, spawn_reader(key, reader, inbound_tx.clone()));
                                watch_writer(key, writer, inbound_tx.clone());
                            }
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                Some(inbound) = inbound_rx.recv() => {
                    match inbound {
                        Inbound::Frame { key, frame, size } => {
                            host.note_received_bytes(size);
                            if let Err(e) = host.handle_receive(key, frame) {
                                warn!("Closed {}: {}", key, e);
                            }
                        }
                        Inbound::Error { key, error } => {
                            match &error {
                                ChannelError::Closed => info!("Connection closed: {}", key),
                                other => warn!("I/O error on {}: {}", key, other),
                            }
                            host.handle_error(key, error);
                        }
                    }
                }
                _ = housekeeping.tick() => host.housekeeping(),
                _ = status.tick() => host.publish_status(),
                _ = self.shutdown.notified() => {
                    info!("Shutdown signal received");
                    break;
                }
            }

            for key in host.drain_closed() {
                if let Some(reader) = readers.remove(&key) {
                    reader.abort();
                    debug!("Stopped reader of {}", key);
                }
            }
        }

        host.stop();
        for (_, reader) in readers.drain() {
            reader.abort();
        }
        Ok(())
    }

    fn accept(
        &self,
        host: &mut HostTransceiver,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Option<(ConnectionKey, FrameReader, WriterHandle)> {
        let (reader, channel, writer) = tcp::split(stream, peer, self.config.max_message_size);
        match host.accept(Box::new(channel)) {
            Ok(key) => {
                info!("New connection from {} ({})", peer, key);
                Some((key, reader, writer))
            }
            Err(e) => {
                warn!("Cannot accept {}: {}", peer, e);
                None
            }
        }
    }
}

type WriterHandle = JoinHandle<Result<(), ChannelError>>;

/// Post a writer failure to the actor. A writer that ends cleanly was closed
/// by the host, so there is nothing to report.
fn watch_writer(key: ConnectionKey, writer: WriterHandle, tx: mpsc::UnboundedSender<Inbound>) {
    tokio::spawn(async move {
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                let _ = tx.send(Inbound::Error { key, error });
            }
            Err(e) => debug!("Writer of {} stopped: {}", key, e),
        }
    });
}

fn spawn_reader(
    key: ConnectionKey,
    mut reader: FrameReader,
    tx: mpsc::UnboundedSender<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let inbound = match reader.read_frame().await {
                Ok(Some((frame, size))) => Inbound::Frame { key, frame, size },
                Ok(None) => Inbound::Error {
                    key,
                    error: ChannelError::Closed,
                },
                Err(error) => Inbound::Error { key, error },
            };
            let last = matches!(inbound, Inbound::Error { .. });
            if tx.send(inbound).is_err() || last {
                break;
            }
        }
    })
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("broker already running")]
    AlreadyRunning,

    #[error(transparent)]
    Transceiver(#[from] TransceiverError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use dots::io::GuestTransceiver;
    use dots::protocol::ConnectionState;
    use dots::types::{FundamentalType, StructDescriptor, StructFlags};
    use std::time::Duration;

    async fn start(config: ServerConfig) -> (Broker, SocketAddr, JoinHandle<Result<(), ServerError>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broker = Broker::new(config).unwrap();
        let server = broker.clone();
        let handle = tokio::spawn(async move { server.serve(listener).await });
        (broker, addr, handle)
    }

    /// Run a guest over a real socket until it reaches `Connected`.
    async fn connect(addr: SocketAddr, name: &str, secret: Option<&str>) -> (GuestTransceiver, FrameReader) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut reader, channel, _writer) = tcp::split(stream, addr, 1 << 20);
        let mut guest = GuestTransceiver::new(name).unwrap();
        guest
            .register_struct(
                StructDescriptor::builder("Ping")
                    .flags(StructFlags::CACHED)
                    .key_property("id", 1, FundamentalType::UInt32)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        guest.open(Box::new(channel), &["Ping"], &[], secret).unwrap();

        while guest.state() != ConnectionState::Connected {
            let next = tokio::time::timeout(Duration::from_secs(5), reader.read_frame()).await;
            match next.unwrap().unwrap() {
                Some((frame, _)) => {
                    if guest.handle_receive(frame).is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
        (guest, reader)
    }

    #[tokio::test]
    async fn test_guest_connects_over_tcp() {
        let (broker, addr, handle) = start(ServerConfig::default()).await;

        let (guest, _reader) = connect(addr, "tcp-guest", None).await;
        assert_eq!(guest.state(), ConnectionState::Connected);
        assert_eq!(guest.client_id(), Some(2));

        broker.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_authentication_over_tcp() {
        let config = ServerConfig {
            auth_secret: Some("s3cret".into()),
            ..Default::default()
        };
        let (broker, addr, handle) = start(config).await;

        let (good, _r1) = connect(addr, "good", Some("s3cret")).await;
        assert_eq!(good.state(), ConnectionState::Connected);
        let (bad, _r2) = connect(addr, "bad", Some("guess")).await;
        assert_eq!(bad.state(), ConnectionState::Closed);

        broker.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_twice_rejected() {
        let (broker, _addr, handle) = start(ServerConfig::default()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(broker.serve(listener).await, Err(ServerError::AlreadyRunning)));

        broker.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_writer_failure_reaches_actor() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let failed: WriterHandle = tokio::spawn(async {
            Err(ChannelError::Io(std::io::ErrorKind::BrokenPipe.into()))
        });
        let clean: WriterHandle = tokio::spawn(async { Ok(()) });
        watch_writer(ConnectionKey(7), clean, tx.clone());
        watch_writer(ConnectionKey(9), failed, tx);

        let inbound = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            inbound,
            Inbound::Error {
                key: ConnectionKey(9),
                error: ChannelError::Io(_)
            }
        ));
        // Both watchers are done and only the failure was reported.
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        assert!(matches!(Broker::new(config), Err(ServerError::Config(_))));
    }
}
