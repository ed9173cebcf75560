//! Binary protocol between the live server and its viewers.
//!
//! One bincode-encoded frame per WebSocket binary message:
//! ```text
//! client ──► server   ClientFrame  (subscribe / unsubscribe / navigate / ping)
//! client ◄── server   ServerFrame  (pointer / list change / shared view / ack / failure / pong)
//! ```
//!
//! Every request carries a caller-chosen `request_id` that the matching
//! `Ack` or `Failed` echoes back.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use hudson_core::{LiveError, SetId, SharedView, StatePointer, TenantId};

use crate::broadcast::{ListChange, LiveEvent};
use crate::navigation::NavCommand;

/// What a connection is subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Full pointer snapshots of one set
    Pointer(SetId),
    /// Structural change notices for one tenant
    List(TenantId),
    /// Recomputed share projection of one set
    Shared(SetId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientFrame {
    SubscribePointer {
        request_id: u64,
        tenant_id: TenantId,
        set_id: SetId,
    },
    SubscribeList {
        request_id: u64,
        tenant_id: TenantId,
    },
    /// Read-only access through a share token
    SubscribeShared { request_id: u64, token: String },
    Unsubscribe { request_id: u64, channel: Channel },
    Navigate {
        request_id: u64,
        tenant_id: TenantId,
        set_id: SetId,
        command: NavCommand,
    },
    Ping { nonce: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerFrame {
    Pointer(StatePointer),
    ListChanged {
        tenant_id: TenantId,
        set_id: Option<SetId>,
        change: ListChange,
    },
    Shared(SharedView),
    /// Request accepted. Navigation acks carry the committed pointer.
    Ack {
        request_id: u64,
        channel: Option<Channel>,
        pointer: Option<StatePointer>,
    },
    Failed {
        request_id: u64,
        code: String,
        message: String,
    },
    Pong { nonce: u64 },
}

impl ServerFrame {
    pub fn ack(request_id: u64) -> Self {
        ServerFrame::Ack {
            request_id,
            channel: None,
            pointer: None,
        }
    }

    pub fn failed(request_id: u64, error: &LiveError) -> Self {
        ServerFrame::Failed {
            request_id,
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<&LiveEvent> for ServerFrame {
    fn from(event: &LiveEvent) -> Self {
        match event {
            LiveEvent::Pointer(pointer) => ServerFrame::Pointer(pointer.clone()),
            LiveEvent::ListChanged {
                tenant_id,
                set_id,
                change,
            } => ServerFrame::ListChanged {
                tenant_id: *tenant_id,
                set_id: *set_id,
                change: *change,
            },
        }
    }
}

/// Serialize to binary wire format.
pub fn encode<T: Serialize>(frame: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(frame, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

/// Deserialize from binary wire format.
pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(frame)
}

impl ClientFrame {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

impl ServerFrame {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection error: {0}")]
    ConnectionError(String),
}
