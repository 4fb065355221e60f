//! One call session per WebSocket connection.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};
use voxline_agent::TurnController;
use voxline_core::frame::{ResponseFrame, Transport};
use voxline_core::turn::{InteractionKind, Speaker, TranscriptEntry, TurnRequest};

use crate::GatewayState;

pub const ERROR_CLOSE_CODE: u16 = 1002;
pub const ERROR_CLOSE_REASON: &str = "Error processing message.";

/// A request from the call peer. `transcript` is the whole call so far.
#[derive(Debug, Deserialize)]
pub struct InboundRequest {
    #[serde(default)]
    pub response_id: Option<u64>,
    #[serde(default)]
    pub transcript: Vec<TranscriptEntry>,
    pub interaction_type: InteractionKind,
}

/// Tracks how much of the peer's transcript has been handed to the
/// controller.
#[derive(Debug, Default)]
pub struct TranscriptCursor {
    consumed: usize,
}

impl TranscriptCursor {
    /// User entries past the cursor. Only `advance` moves it.
    pub fn delta(&mut self, transcript: &[TranscriptEntry], advance: bool) -> Vec<TranscriptEntry> {
        let fresh: Vec<TranscriptEntry> = transcript
            .get(self.consumed..)
            .unwrap_or_default()
            .iter()
            .filter(|entry| entry.role == Speaker::User)
            .cloned()
            .collect();
        if advance {
            self.consumed = self.consumed.max(transcript.len());
        }
        fresh
    }
}

/// What the socket loop should do after a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStep {
    Continue,
    Close { code: u16, reason: &'static str },
}

pub struct CallSession {
    call_id: String,
    controller: TurnController,
    cursor: TranscriptCursor,
}

impl CallSession {
    /// Register the call, greet the caller, and seed the history with the
    /// greeting.
    pub async fn open(
        call_id: &str,
        state: &GatewayState,
        transport: Arc<dyn Transport>,
    ) -> voxline_core::Result<Self> {
        state.records.open_call(call_id).await?;

        let mut controller = state.runtime.controller(call_id, transport.clone());
        transport.send(ResponseFrame::begin(&state.runtime.intro)).await?;
        controller.record_agent_speech(&state.runtime.intro);

        info!(call_id = %call_id, "Call session opened");
        Ok(Self {
            call_id: call_id.to_string(),
            controller,
            cursor: TranscriptCursor::default(),
        })
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn controller(&self) -> &TurnController {
        &self.controller
    }

    /// Handle one text message from the peer.
    pub async fn handle_text(&mut self, text: &str) -> SessionStep {
        let inbound: InboundRequest = match serde_json::from_str(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "Ignoring unparseable message");
                return SessionStep::Continue;
            }
        };

        let advance = inbound.interaction_type != InteractionKind::UpdateOnly;
        let request = TurnRequest {
            interaction: inbound.interaction_type,
            transcript_delta: self.cursor.delta(&inbound.transcript, advance),
            response_id: inbound.response_id.unwrap_or_default(),
        };

        match self.controller.process_turn(request).await {
            Ok(outcome) => {
                if outcome.end_call {
                    info!(call_id = %self.call_id, "Agent ended the call");
                }
                SessionStep::Continue
            }
            Err(e) if e.is_deadline() => SessionStep::Continue,
            Err(e) => {
                error!(call_id = %self.call_id, error = %e, "Closing call after turn failure");
                SessionStep::Close {
                    code: ERROR_CLOSE_CODE,
                    reason: ERROR_CLOSE_REASON,
                }
            }
        }
    }
}

/// Whether a peer close means the caller dropped rather than hung up.
pub fn is_abandonment(close_code: Option<u16>) -> bool {
    close_code != Some(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_hands_out_each_user_line_once() {
        let mut cursor = TranscriptCursor::default();
        let mut transcript = vec![
            TranscriptEntry::agent("Hey, how's it going?"),
            TranscriptEntry::user("my heater is broken"),
        ];

        let first = cursor.delta(&transcript, true);
        assert_eq!(first, vec![TranscriptEntry::user("my heater is broken")]);

        transcript.push(TranscriptEntry::agent("Sorry to hear that."));
        transcript.push(TranscriptEntry::user("can you send someone"));
        let second = cursor.delta(&transcript, true);
        assert_eq!(second, vec![TranscriptEntry::user("can you send someone")]);

        assert!(cursor.delta(&transcript, true).is_empty());
    }

    #[test]
    fn update_only_does_not_advance() {
        let mut cursor = TranscriptCursor::default();
        let transcript = vec![TranscriptEntry::user("I need")];

        assert_eq!(cursor.delta(&transcript, false).len(), 1);
        assert_eq!(cursor.delta(&transcript, true).len(), 1);
        assert!(cursor.delta(&transcript, true).is_empty());
    }

    #[test]
    fn shorter_transcript_yields_nothing() {
        let mut cursor = TranscriptCursor::default();
        cursor.delta(&[TranscriptEntry::user("a"), TranscriptEntry::user("b")], true);
        assert!(cursor.delta(&[TranscriptEntry::user("a")], true).is_empty());
    }

    #[test]
    fn inbound_requests_parse_peer_json() {
        let inbound: InboundRequest = serde_json::from_str(
            r#"{"response_id": 4, "interaction_type": "response_required",
                "transcript": [{"role": "agent", "content": "Hi"}, {"role": "user", "content": "Hello"}]}"#,
        )
        .unwrap();
        assert_eq!(inbound.response_id, Some(4));
        assert_eq!(inbound.interaction_type, InteractionKind::ResponseRequired);
        assert_eq!(inbound.transcript.len(), 2);

        let update: InboundRequest =
            serde_json::from_str(r#"{"interaction_type": "update_only"}"#).unwrap();
        assert!(update.transcript.is_empty());
    }

    #[test]
    fn only_normal_close_is_a_hangup() {
        assert!(!is_abandonment(Some(1000)));
        assert!(is_abandonment(Some(1001)));
        assert!(is_abandonment(None));
    }
}
