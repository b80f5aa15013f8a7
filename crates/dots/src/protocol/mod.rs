// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire protocol: frame header, codec and built-in control types.

pub mod codec;
pub mod control;
pub mod header;

pub use codec::{CodecError, RawFrame, Transmission, DEFAULT_MAX_FRAME_SIZE, FRAME_PREFIX_LEN};
pub use control::{
    register_builtin_types, ConnectionState, ControlRecord, DotsCacheInfo, DotsClearCache,
    DotsClient, DotsDaemonStatus, DotsDescriptorRequest, DotsMember, DotsMsgConnect,
    DotsMsgConnectResponse, DotsMsgError, DotsMsgHello, EnumDescriptorData, EnumElementData,
    MemberEvent, StructDescriptorData, StructPropertyData,
};
pub use header::{TransportHeader, SYSTEM_NAMESPACE};

use crate::types::{DescriptorError, RecordError, RegistryError};
use thiserror::Error;

/// Session-level protocol failure. Closes the offending connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed {type_name}: {reason}")]
    MalformedControl { type_name: String, reason: String },

    #[error("unexpected {what} in state {state}")]
    UnexpectedState {
        what: String,
        state: ConnectionState,
    },

    #[error("type '{0}' is not known")]
    UnknownType(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

impl ProtocolError {
    /// Numeric code sent in `DotsMsgError`.
    pub fn code(&self) -> i32 {
        match self {
            Self::MalformedControl { .. } => 1,
            Self::UnexpectedState { .. } => 2,
            Self::UnknownType(_) => 3,
            Self::Codec(_) => 4,
            Self::Record(_) => 5,
            Self::Registry(_) | Self::Descriptor(_) => 6,
        }
    }
}
