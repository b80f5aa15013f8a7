// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP transport.
//!
//! A socket is split into a [`FrameReader`], polled by the runtime, and a
//! [`TcpChannel`] handed to a transceiver. The channel queues encoded frames
//! to a writer task, so transmitting never waits on the socket.
//!
//! Wire format: 4-byte big-endian length, then the JSON frame body.

use super::channel::{Channel, ChannelError};
use crate::protocol::codec::check_frame_len;
use crate::protocol::{RawFrame, FRAME_PREFIX_LEN};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Inbound half: reads one frame at a time.
pub struct FrameReader<R = OwnedReadHalf> {
    reader: R,
    max_frame_size: usize,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, max_frame_size: usize) -> Self {
        Self {
            reader,
            max_frame_size,
            buffer: Vec::with_capacity(4096),
        }
    }

    /// Read the next frame and its wire size.
    ///
    /// Returns `Ok(None)` when the peer closed the connection between frames.
    pub async fn read_frame(&mut self) -> Result<Option<(RawFrame, usize)>, ChannelError> {
        let mut len_buf = [0u8; FRAME_PREFIX_LEN];
        match self.reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        check_frame_len(len, self.max_frame_size)?;

        self.buffer.clear();
        self.buffer.resize(len, 0);
        self.reader.read_exact(&mut self.buffer).await?;

        let frame = RawFrame::decode_body(&self.buffer)?;
        Ok(Some((frame, FRAME_PREFIX_LEN + len)))
    }
}

/// Outbound half: queues frames to the writer task.
#[derive(Debug)]
pub struct TcpChannel {
    peer: String,
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    max_frame_size: usize,
}

impl Channel for TcpChannel {
    fn transmit_raw(&mut self, frame: &RawFrame) -> Result<(), ChannelError> {
        let tx = self.tx.as_ref().ok_or(ChannelError::Closed)?;
        let bytes = frame.encode(self.max_frame_size)?;
        tx.send(bytes).map_err(|_| ChannelError::Closed)
    }

    fn peer_description(&self) -> String {
        self.peer.clone()
    }

    fn close(&mut self) {
        // Dropping the sender lets the writer flush the queue and shut down.
        self.tx = None;
    }
}

/// Split a connected socket.
///
/// Must be called within a tokio runtime; the writer task ends when the
/// channel is closed or dropped, or on the first write error, which the
/// returned handle yields. Frames queued after a write error are lost, so a
/// runtime should treat a failed writer like a failed reader.
pub fn split(
    stream: TcpStream,
    peer: SocketAddr,
    max_frame_size: usize,
) -> (FrameReader, TcpChannel, JoinHandle<Result<(), ChannelError>>) {
    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("[tcp] set_nodelay failed for {}: {}", peer, e);
    }
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    let writer = tokio::spawn(write_loop(write_half, rx, peer.to_string()));
    let channel = TcpChannel {
        peer: peer.to_string(),
        tx: Some(tx),
        max_frame_size,
    };
    (FrameReader::new(read_half, max_frame_size), channel, writer)
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    peer: String,
) -> Result<(), ChannelError> {
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            log::warn!("[tcp] write to {} failed: {}", peer, e);
            return Err(e.into());
        }
        if let Err(e) = writer.flush().await {
            log::warn!("[tcp] flush to {} failed: {}", peer, e);
            return Err(e.into());
        }
    }
    let _ = writer.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{TransportHeader, DEFAULT_MAX_FRAME_SIZE};
    use crate::types::PropertySet;
    use tokio::net::TcpListener;

    fn frame(type_name: &str) -> RawFrame {
        RawFrame {
            header: TransportHeader::new(type_name, PropertySet::NONE),
            payload: serde_json::json!({"x": 1}),
        }
    }

    #[tokio::test]
    async fn test_frames_roundtrip_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (_reader, mut channel, writer) = split(stream, addr, DEFAULT_MAX_FRAME_SIZE);
            channel.transmit_raw(&frame("A")).unwrap();
            channel.transmit_raw(&frame("B")).unwrap();
            channel.close();
            assert!(matches!(channel.transmit_raw(&frame("C")), Err(ChannelError::Closed)));
            writer.await.unwrap().unwrap();
        });

        let (stream, peer) = listener.accept().await.unwrap();
        let (mut reader, _channel, _writer) = split(stream, peer, DEFAULT_MAX_FRAME_SIZE);

        let (a, size) = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(a.header.type_name, "A");
        assert!(size > FRAME_PREFIX_LEN);
        let (b, _) = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(b, frame_with_time(&frame("B"), &b));
        assert!(reader.read_frame().await.unwrap().is_none());

        client.await.unwrap();
    }

    /// `frame()` stamps the current time; compare everything else.
    fn frame_with_time(expected: &RawFrame, actual: &RawFrame) -> RawFrame {
        let mut expected = expected.clone();
        expected.header.sent_time = actual.header.sent_time;
        expected
    }

    #[tokio::test]
    async fn test_writer_reports_broken_peer() {
        let (a, b) = tokio::io::duplex(64);
        drop(b);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(vec![0u8; 16]).unwrap();
        drop(tx);

        let result = write_loop(a, rx, "gone".into()).await;
        assert!(matches!(result, Err(ChannelError::Io(_))));
    }

    #[tokio::test]
    async fn test_writer_ends_cleanly_on_close() {
        let (a, _b) = tokio::io::duplex(64);
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(vec![0u8; 16]).unwrap();
        drop(tx);

        assert!(write_loop(a, rx, "peer".into()).await.is_ok());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, b) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(b, 8);
        a.write_all(&100u32.to_be_bytes()).await.unwrap();
        assert!(matches!(reader.read_frame().await, Err(ChannelError::Codec(_))));
    }
}
