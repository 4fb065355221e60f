//! The turn controller: one per call session.
//!
//! A turn runs the primary stream through the [`DeltaDemultiplexer`] and
//! resolves along one of three paths:
//!
//! 1. **Plain**: content is spoken as it arrives.
//! 2. **Fallback**: the primary model is flagged for plain text, so its
//!    stream is abandoned on the first content fragment and the fallback
//!    model answers instead.
//! 3. **Tool**: the single tool call is dispatched, then the primary model
//!    speaks a follow-up with the tool result in context.
//!
//! Whatever happens, the last frame of every turn is its terminal frame.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};
use voxline_config::AppConfig;
use voxline_core::error::{TransportError, TurnError};
use voxline_core::event::{DomainEvent, EventBus};
use voxline_core::frame::{ResponseFrame, Transport};
use voxline_core::message::{Message, MessageHistory};
use voxline_core::provider::{EventStream, ModelRoute, ProviderRequest, ToolDefinition};
use voxline_core::tool::{ToolCall, ToolKind};
use voxline_core::turn::{InteractionKind, Speaker, TurnRequest};
use voxline_tools::{ToolDispatcher, all_definitions};

use crate::demux::{DeltaDemultiplexer, Demuxed};
use crate::fallback::ModelFallbackPolicy;

/// Generation settings applied to every request of a turn.
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Covers every stream request and the tool dispatch
    pub deadline: Option<Duration>,
    pub reminder_prompt: String,
}

impl TurnSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            temperature: config.llm.temperature,
            max_tokens: (config.llm.max_tokens > 0).then_some(config.llm.max_tokens),
            deadline: config.turn.deadline(),
            reminder_prompt: config.turn.reminder_prompt.clone(),
        }
    }
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// How a turn resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPath {
    /// Update-only request: nothing ran.
    Skipped,
    Plain,
    Fallback,
    Tool(ToolKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub response_id: u64,
    /// Frames sent, terminal included
    pub frames: usize,
    pub end_call: bool,
    pub path: TurnPath,
}

/// Writes one turn's frames and guarantees a single terminal frame.
struct FrameEmitter {
    transport: Arc<dyn Transport>,
    response_id: u64,
    frames: usize,
    completed: bool,
    hang_up: Option<ToolCall>,
}

impl FrameEmitter {
    fn new(transport: Arc<dyn Transport>, response_id: u64) -> Self {
        Self {
            transport,
            response_id,
            frames: 0,
            completed: false,
            hang_up: None,
        }
    }

    async fn speak(&mut self, text: &str) -> Result<(), TransportError> {
        if text.is_empty() || self.completed {
            return Ok(());
        }
        self.transport
            .send(ResponseFrame::chunk(self.response_id, text))
            .await?;
        self.frames += 1;
        Ok(())
    }

    /// Send the terminal frame. Calls after a successful send are no-ops.
    async fn complete(&mut self, end_call: bool) -> Result<(), TransportError> {
        if self.completed {
            return Ok(());
        }
        self.transport
            .send(ResponseFrame::terminal(self.response_id, end_call))
            .await?;
        self.completed = true;
        self.frames += 1;
        Ok(())
    }
}

/// Orchestrates the turns of one call session.
///
/// `process_turn` takes `&mut self`, so turns of a session cannot overlap.
pub struct TurnController {
    session_id: String,
    history: MessageHistory,
    primary: ModelRoute,
    fallback: Option<ModelRoute>,
    policy: ModelFallbackPolicy,
    dispatcher: Arc<ToolDispatcher>,
    transport: Arc<dyn Transport>,
    tools: Vec<ToolDefinition>,
    settings: TurnSettings,
    event_bus: Option<Arc<EventBus>>,
}

impl TurnController {
    pub fn new(
        session_id: impl Into<String>,
        history: MessageHistory,
        primary: ModelRoute,
        dispatcher: Arc<ToolDispatcher>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            history,
            primary,
            fallback: None,
            policy: ModelFallbackPolicy::default(),
            dispatcher,
            transport,
            tools: all_definitions(),
            settings: TurnSettings::default(),
            event_bus: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Option<ModelRoute>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_policy(mut self, policy: ModelFallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_settings(mut self, settings: TurnSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    /// Record speech that reached the caller outside a turn (the intro).
    pub fn record_agent_speech(&mut self, text: impl Into<String>) {
        self.history.push(Message::assistant(text));
    }

    /// Run one turn, writing all output through the transport.
    ///
    /// Errors are returned after the terminal frame has been attempted.
    pub async fn process_turn(&mut self, request: TurnRequest) -> Result<TurnOutcome, TurnError> {
        if request.interaction == InteractionKind::UpdateOnly {
            debug!(session_id = %self.session_id, "Update-only request; nothing to do");
            return Ok(TurnOutcome {
                response_id: request.response_id,
                frames: 0,
                end_call: false,
                path: TurnPath::Skipped,
            });
        }

        let started = Instant::now();
        let response_id = request.response_id;
        self.absorb(&request);

        info!(
            session_id = %self.session_id,
            response_id,
            model = %self.primary.model,
            interaction = ?request.interaction,
            "Turn started"
        );
        self.publish(DomainEvent::TurnStarted {
            session_id: self.session_id.clone(),
            response_id,
            model: self.primary.model.clone(),
            timestamp: Utc::now(),
        });

        let mut emitter = FrameEmitter::new(self.transport.clone(), response_id);
        let resolved = match self.settings.deadline {
            Some(limit) => match tokio::time::timeout(limit, self.run(&mut emitter)).await {
                Ok(resolved) => resolved,
                Err(_) => {
                    warn!(session_id = %self.session_id, response_id, ?limit, "Turn deadline exceeded");
                    Err(TurnError::DeadlineExceeded(limit))
                }
            },
            None => self.run(&mut emitter).await,
        };

        let hang_up = emitter.hang_up.take();
        let closed = emitter.complete(hang_up.is_some()).await;
        let mut resolved = match (resolved, closed) {
            (Ok(resolved), Ok(())) => Ok(resolved),
            (Ok(_), Err(e)) => Err(TurnError::Transport(e)),
            (Err(e), _) => Err(e),
        };
        if let Some(call) = hang_up {
            let ended = self.hang_up(call, response_id).await;
            if resolved.is_ok() {
                resolved = ended.and(resolved);
            }
        }

        match resolved {
            Ok((path, end_call)) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    session_id = %self.session_id,
                    response_id,
                    frames = emitter.frames,
                    end_call,
                    ?path,
                    duration_ms,
                    "Turn completed"
                );
                self.publish(DomainEvent::TurnCompleted {
                    session_id: self.session_id.clone(),
                    response_id,
                    frames: emitter.frames,
                    end_call,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                Ok(TurnOutcome {
                    response_id,
                    frames: emitter.frames,
                    end_call,
                    path,
                })
            }
            Err(e) => {
                if !e.is_deadline() {
                    error!(session_id = %self.session_id, response_id, error = %e, "Turn failed");
                }
                self.publish(DomainEvent::TurnFailed {
                    session_id: self.session_id.clone(),
                    response_id,
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                Err(e)
            }
        }
    }

    /// Append the transcript delta (and the reminder prompt) to history.
    fn absorb(&mut self, request: &TurnRequest) {
        for entry in &request.transcript_delta {
            if entry.content.trim().is_empty() {
                continue;
            }
            self.history.push(match entry.role {
                Speaker::User => Message::user(&entry.content),
                Speaker::Agent => Message::assistant(&entry.content),
            });
        }
        if request.interaction == InteractionKind::ReminderRequired {
            self.history.push(Message::user(&self.settings.reminder_prompt));
        }
    }

    async fn run(&mut self, emitter: &mut FrameEmitter) -> Result<(TurnPath, bool), TurnError> {
        let primary = self.primary.clone();
        let mut stream = primary.provider.stream(self.request(&primary, true)).await?;
        let mut demux = DeltaDemultiplexer::new();
        let mut spoken = String::new();
        let mut warned_no_fallback = false;

        while let Some(event) = stream.recv().await {
            match demux.feed(event?) {
                Demuxed::Content(text) => {
                    if self.policy.should_fallback(&primary.model, demux.is_tool_turn()) {
                        if let Some(fallback) = self.fallback.clone() {
                            // releases the primary connection
                            drop(stream);
                            return self.run_fallback(&fallback, emitter).await;
                        }
                        if !warned_no_fallback {
                            warn!(
                                session_id = %self.session_id,
                                model = %primary.model,
                                "Model is flagged for plain text but no fallback is configured"
                            );
                            warned_no_fallback = true;
                        }
                    }
                    emitter.speak(&text).await?;
                    spoken.push_str(&text);
                }
                Demuxed::Pending => {}
                Demuxed::Stop => break,
            }
        }
        drop(stream);

        if let (Some(kept), Some(dropped)) = (demux.open_id(), demux.dropped_id()) {
            self.publish(DomainEvent::StreamTruncated {
                session_id: self.session_id.clone(),
                kept_call_id: kept.to_string(),
                dropped_call_id: dropped.to_string(),
                timestamp: Utc::now(),
            });
        }

        match demux.finish()? {
            Some(call) => self.run_tool(call, emitter).await,
            None => {
                if !spoken.is_empty() {
                    self.history.push(Message::assistant(spoken));
                }
                Ok((TurnPath::Plain, false))
            }
        }
    }

    async fn run_fallback(
        &mut self,
        fallback: &ModelRoute,
        emitter: &mut FrameEmitter,
    ) -> Result<(TurnPath, bool), TurnError> {
        info!(
            session_id = %self.session_id,
            primary = %self.primary.model,
            fallback = %fallback.model,
            "Falling back for plain-text reply"
        );
        self.publish(DomainEvent::FallbackTriggered {
            session_id: self.session_id.clone(),
            primary_model: self.primary.model.clone(),
            fallback_model: fallback.model.clone(),
            timestamp: Utc::now(),
        });

        let stream = fallback.provider.stream(self.request(fallback, false)).await?;
        let spoken = speak_content(stream, emitter).await?;
        if !spoken.is_empty() {
            self.history.push(Message::assistant(spoken));
        }
        Ok((TurnPath::Fallback, false))
    }

    async fn run_tool(
        &mut self,
        call: ToolCall,
        emitter: &mut FrameEmitter,
    ) -> Result<(TurnPath, bool), TurnError> {
        let kind = call.kind().map_err(|source| TurnError::Dispatch {
            session_id: self.session_id.clone(),
            tool: call.name.clone(),
            source,
        })?;
        let message = call.message().map(str::to_string);
        if kind.ends_call() {
            // Hang-up runs after the deadline section; see `hang_up`.
            emitter.hang_up = Some(call);
            if let Some(text) = &message {
                emitter.speak(text).await?;
            }
            return Ok((TurnPath::Tool(kind), true));
        }
        if let Some(text) = &message {
            emitter.speak(text).await?;
        }

        let done = self.dispatch(call).await?;
        self.history.push(Message::assistant_tool_calls(
            message,
            vec![done.to_message_call()],
        ));
        self.history.push(Message::tool_result(
            &done.id,
            done.result.clone().unwrap_or_default(),
        ));

        let primary = self.primary.clone();
        let stream = primary.provider.stream(self.request(&primary, true)).await?;
        let spoken = speak_content(stream, emitter).await?;
        if !spoken.is_empty() {
            self.history.push(Message::assistant(spoken));
        }
        Ok((TurnPath::Tool(kind), done.ends_call))
    }

    /// Mark the call ended once the terminal frame has gone out.
    ///
    /// Runs outside the turn deadline with a grace period of its own, so a
    /// slow transport cannot skip the records update.
    async fn hang_up(&mut self, call: ToolCall, response_id: u64) -> Result<(), TurnError> {
        let message = call.message().map(str::to_string);
        let dispatched = match self.settings.deadline {
            Some(grace) => match tokio::time::timeout(grace, self.dispatch(call)).await {
                Ok(dispatched) => dispatched,
                Err(_) => {
                    warn!(session_id = %self.session_id, response_id, ?grace, "Hang-up timed out");
                    Err(TurnError::DeadlineExceeded(grace))
                }
            },
            None => self.dispatch(call).await,
        };
        if let Some(text) = message {
            self.history.push(Message::assistant(text));
        }

        info!(session_id = %self.session_id, response_id, success = dispatched.is_ok(), "Call ended");
        self.publish(DomainEvent::CallEnded {
            session_id: self.session_id.clone(),
            response_id,
            success: dispatched.is_ok(),
            timestamp: Utc::now(),
        });
        dispatched.map(|_| ())
    }

    async fn dispatch(&self, call: ToolCall) -> Result<ToolCall, TurnError> {
        let tool = call.name.clone();
        let started = Instant::now();
        let result = self.dispatcher.dispatch(&self.session_id, call).await;

        self.publish(DomainEvent::ToolDispatched {
            session_id: self.session_id.clone(),
            tool_name: tool.clone(),
            success: result.is_ok(),
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });

        result.map_err(|source| TurnError::Dispatch {
            session_id: self.session_id.clone(),
            tool,
            source,
        })
    }

    fn request(&self, route: &ModelRoute, with_tools: bool) -> ProviderRequest {
        ProviderRequest {
            model: route.model.clone(),
            messages: self.history.snapshot(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            tools: if with_tools { self.tools.clone() } else { Vec::new() },
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// Speak every content fragment of a secondary stream (fallback or
/// follow-up). A tool call here ends the stream; the turn already has one.
async fn speak_content(mut stream: EventStream, emitter: &mut FrameEmitter) -> Result<String, TurnError> {
    let mut demux = DeltaDemultiplexer::new();
    let mut spoken = String::new();

    while let Some(event) = stream.recv().await {
        match demux.feed(event?) {
            Demuxed::Content(text) => {
                emitter.speak(&text).await?;
                spoken.push_str(&text);
            }
            Demuxed::Pending if demux.is_tool_turn() => {
                warn!("Secondary stream requested a tool; ignoring the rest of it");
                break;
            }
            Demuxed::Pending => {}
            Demuxed::Stop => break,
        }
    }

    Ok(spoken)
}
