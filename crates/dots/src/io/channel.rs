// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame transport abstraction.
//!
//! A [`Channel`] is the outbound half of a duplex frame transport. Inbound
//! frames and transport errors are fed to the owning transceiver by the
//! runtime driving the channel, one call per frame, in arrival order.

use crate::protocol::{CodecError, RawFrame, TransportHeader, DEFAULT_MAX_FRAME_SIZE, FRAME_PREFIX_LEN};
use crate::types::RecordRef;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel closed")]
    Closed,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Outbound half of a frame transport.
pub trait Channel: Send {
    /// Queue an already serialized frame.
    fn transmit_raw(&mut self, frame: &RawFrame) -> Result<(), ChannelError>;

    /// Serialize `header.attributes` of `record` and queue it.
    fn transmit(&mut self, header: &TransportHeader, record: RecordRef<'_>) -> Result<(), ChannelError> {
        self.transmit_raw(&RawFrame::new(header.clone(), record))
    }

    /// Human readable peer description, e.g. a socket address.
    fn peer_description(&self) -> String;

    /// Stop transmitting. Further transmits fail with [`ChannelError::Closed`].
    fn close(&mut self) {}
}

/// Something a runtime received on a channel.
#[derive(Debug)]
pub enum ChannelEvent {
    Frame(RawFrame),
    Error(ChannelError),
}

#[derive(Debug, Default)]
struct MemoryState {
    sent: Vec<RawFrame>,
    closed: bool,
    fail_transmit: bool,
}

/// In-process channel that records what is transmitted.
///
/// Clones share state, so a test keeps one handle while the transceiver
/// owns another. Every frame goes through the wire encoding so the
/// recorded frames are exactly what a socket peer would decode.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Remove and return every frame transmitted so far.
    pub fn take_sent(&self) -> Vec<RawFrame> {
        std::mem::take(&mut self.state.lock().sent)
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().sent.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Make every following transmit fail with an I/O error.
    pub fn fail_transmits(&self, fail: bool) {
        self.state.lock().fail_transmit = fail;
    }
}

impl Channel for MemoryChannel {
    fn transmit_raw(&mut self, frame: &RawFrame) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if state.fail_transmit {
            return Err(ChannelError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "injected transmit failure",
            )));
        }

        let bytes = frame.encode(DEFAULT_MAX_FRAME_SIZE)?;
        let decoded = RawFrame::decode_body(&bytes[FRAME_PREFIX_LEN..])?;
        state.sent.push(decoded);
        Ok(())
    }

    fn peer_description(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn close(&mut self) {
        self.state.lock().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertySet;

    fn frame(type_name: &str) -> RawFrame {
        RawFrame {
            header: TransportHeader::new(type_name, PropertySet::NONE),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn test_memory_channel_records_frames() {
        let handle = MemoryChannel::new("a");
        let mut channel = handle.clone();

        channel.transmit_raw(&frame("Foo")).unwrap();
        channel.transmit_raw(&frame("Bar")).unwrap();

        assert_eq!(handle.sent_count(), 2);
        let sent = handle.take_sent();
        assert_eq!(sent[1].header.type_name, "Bar");
        assert_eq!(handle.sent_count(), 0);
    }

    #[test]
    fn test_memory_channel_close_and_failure() {
        let handle = MemoryChannel::new("b");
        let mut channel = handle.clone();

        handle.fail_transmits(true);
        assert!(matches!(
            channel.transmit_raw(&frame("Foo")),
            Err(ChannelError::Io(_))
        ));

        channel.close();
        assert!(handle.is_closed());
        assert!(matches!(
            channel.transmit_raw(&frame("Foo")),
            Err(ChannelError::Closed)
        ));
        assert_eq!(channel.peer_description(), "memory:b");
    }
}
