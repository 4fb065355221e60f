//! Turn input types.

use serde::{Deserialize, Serialize};

/// Why the peer is asking for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// Transcript changed; the agent must not speak.
    UpdateOnly,
    /// The caller finished speaking and expects a reply.
    ResponseRequired,
    /// The caller has been silent; nudge them.
    ReminderRequired,
}

/// Who said a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Agent,
    User,
}

/// A transcript line as reported by the call peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Speaker,
    pub content: String,
}

impl TranscriptEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Speaker::User,
            content: content.into(),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: Speaker::Agent,
            content: content.into(),
        }
    }
}

/// Everything the turn controller needs to run one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub interaction: InteractionKind,
    /// Transcript lines not yet seen by the controller
    pub transcript_delta: Vec<TranscriptEntry>,
    /// Echoed on every frame of the turn
    pub response_id: u64,
}

impl TurnRequest {
    /// A reply request for a single new caller utterance.
    pub fn respond(response_id: u64, utterance: impl Into<String>) -> Self {
        Self {
            interaction: InteractionKind::ResponseRequired,
            transcript_delta: vec![TranscriptEntry::user(utterance)],
            response_id,
        }
    }

    pub fn reminder(response_id: u64) -> Self {
        Self {
            interaction: InteractionKind::ReminderRequired,
            transcript_delta: Vec::new(),
            response_id,
        }
    }

    pub fn update_only(transcript_delta: Vec<TranscriptEntry>) -> Self {
        Self {
            interaction: InteractionKind::UpdateOnly,
            transcript_delta,
            response_id: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interaction_kinds_use_snake_case() {
        let kind: InteractionKind = serde_json::from_str("\"reminder_required\"").unwrap();
        assert_eq!(kind, InteractionKind::ReminderRequired);
        assert_eq!(
            serde_json::to_string(&InteractionKind::UpdateOnly).unwrap(),
            "\"update_only\""
        );
    }

    #[test]
    fn transcript_entry_parses_peer_shape() {
        let entry: TranscriptEntry =
            serde_json::from_str(r#"{"role":"agent","content":"Hey, how's it going?"}"#).unwrap();
        assert_eq!(entry.role, Speaker::Agent);
    }
}
