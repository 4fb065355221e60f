//! Splits a generation stream into speakable content and at most one
//! tool call.

use serde_json::Value;
use tracing::{debug, warn};
use voxline_core::error::TurnError;
use voxline_core::provider::GenerationEvent;
use voxline_core::tool::ToolCall;

/// What the caller should do with one fed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Demuxed {
    /// Speak this now.
    Content(String),
    /// Nothing to emit; keep reading.
    Pending,
    /// A second tool call started. Stop reading the stream.
    Stop,
}

/// Accumulates the turn's tool call while forwarding content fragments.
///
/// Once any `function` fragment is seen the turn is tool-invoking and all
/// further content is dropped. The first tool-call id wins.
#[derive(Debug, Default)]
pub struct DeltaDemultiplexer {
    tool_turn: bool,
    open: Option<ToolCall>,
    dropped_id: Option<String>,
}

impl DeltaDemultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, event: GenerationEvent) -> Demuxed {
        if let Some(delta) = event.tool_call {
            if delta.kind.as_deref() == Some("function") {
                self.tool_turn = true;
            }

            if self.tool_turn {
                if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                    match self.open.as_ref().map(|call| call.id.clone()) {
                        None => {
                            debug!(call_id = %id, name = ?delta.name, "Tool call opened");
                            self.open = Some(ToolCall::new(id, delta.name.clone().unwrap_or_default()));
                        }
                        Some(kept) if kept == id => {}
                        Some(kept) => {
                            warn!(
                                kept = %kept,
                                dropped = %id,
                                "Second tool call in one turn; discarding the rest of the stream"
                            );
                            self.dropped_id = Some(id);
                            return Demuxed::Stop;
                        }
                    }
                }

                if let Some(call) = self.open.as_mut() {
                    if call.name.is_empty() {
                        if let Some(name) = delta.name {
                            call.name = name;
                        }
                    }
                    if let Some(fragment) = delta.arguments {
                        call.raw_arguments.push_str(&fragment);
                    }
                }
            }
        }

        match event.content {
            Some(text) if !text.is_empty() && !self.tool_turn => Demuxed::Content(text),
            _ => Demuxed::Pending,
        }
    }

    /// Whether a `function` fragment has been seen this turn.
    pub fn is_tool_turn(&self) -> bool {
        self.tool_turn
    }

    /// Id of the call being accumulated.
    pub fn open_id(&self) -> Option<&str> {
        self.open.as_ref().map(|call| call.id.as_str())
    }

    /// Id of the call discarded by [`Demuxed::Stop`], if any.
    pub fn dropped_id(&self) -> Option<&str> {
        self.dropped_id.as_deref()
    }

    /// Parse the accumulated arguments and hand back the call.
    ///
    /// Empty arguments parse as `{}`. Anything that is not a JSON object is
    /// a [`TurnError::ArgumentParse`].
    pub fn finish(self) -> Result<Option<ToolCall>, TurnError> {
        let Some(mut call) = self.open else {
            return Ok(None);
        };

        let raw = call.raw_arguments.trim();
        if !raw.is_empty() {
            call.arguments = match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                Ok(other) => {
                    return Err(TurnError::ArgumentParse {
                        tool: call.name,
                        reason: format!("expected an object, got {other}"),
                    });
                }
                Err(e) => {
                    return Err(TurnError::ArgumentParse {
                        tool: call.name,
                        reason: e.to_string(),
                    });
                }
            };
        }

        Ok(Some(call))
    }
}
