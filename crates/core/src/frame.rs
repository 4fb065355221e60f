//! Response frames and the transport they are written to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// One unit of agent speech sent to the call peer.
///
/// The serialized field names are a wire contract with the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub response_id: u64,
    pub content: String,
    pub content_complete: bool,
    pub end_call: bool,
}

impl ResponseFrame {
    /// A streamed content chunk.
    pub fn chunk(response_id: u64, content: impl Into<String>) -> Self {
        Self {
            response_id,
            content: content.into(),
            content_complete: false,
            end_call: false,
        }
    }

    /// The frame closing a turn.
    pub fn terminal(response_id: u64, end_call: bool) -> Self {
        Self {
            response_id,
            content: String::new(),
            content_complete: true,
            end_call,
        }
    }

    /// The complete intro utterance sent when a session opens.
    pub fn begin(content: impl Into<String>) -> Self {
        Self {
            response_id: 0,
            content: content.into(),
            content_complete: true,
            end_call: false,
        }
    }
}

/// The duplex channel back to the call peer.
///
/// Reliable and ordered, one active peer per session.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: ResponseFrame) -> Result<(), TransportError>;
}
