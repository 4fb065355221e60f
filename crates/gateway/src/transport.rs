//! Frames out to the WebSocket peer.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message as WsMessage};
use tokio::sync::mpsc;
use voxline_core::error::TransportError;
use voxline_core::frame::{ResponseFrame, Transport};

/// Queues frames for the socket's writer task.
#[derive(Clone)]
pub struct WsTransport {
    tx: mpsc::Sender<WsMessage>,
}

impl WsTransport {
    pub fn new(tx: mpsc::Sender<WsMessage>) -> Self {
        Self { tx }
    }

    /// Ask the writer to close the socket.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        self.tx
            .send(WsMessage::Close(Some(frame)))
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, frame: ResponseFrame) -> Result<(), TransportError> {
        let json =
            serde_json::to_string(&frame).map_err(|e| TransportError::Serialization(e.to_string()))?;
        self.tx
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(|_| TransportError::Closed)
    }
}
