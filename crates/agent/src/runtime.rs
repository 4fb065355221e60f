//! Shared per-process wiring from which each call gets its controller.

use std::sync::Arc;

use voxline_config::{AppConfig, ConfigError};
use voxline_core::event::EventBus;
use voxline_core::frame::Transport;
use voxline_core::message::MessageHistory;
use voxline_core::provider::ModelRoute;
use voxline_tools::ToolDispatcher;

use crate::controller::{TurnController, TurnSettings};
use crate::fallback::ModelFallbackPolicy;

/// Everything a call session needs that is shared across calls.
#[derive(Clone)]
pub struct AgentRuntime {
    pub primary: ModelRoute,
    pub fallback: Option<ModelRoute>,
    pub policy: ModelFallbackPolicy,
    pub dispatcher: Arc<ToolDispatcher>,
    pub settings: TurnSettings,
    pub system_prompt: String,
    pub intro: String,
    pub event_bus: Arc<EventBus>,
}

impl AgentRuntime {
    /// Render prompts and turn settings from `config`.
    pub fn from_config(
        config: &AppConfig,
        primary: ModelRoute,
        fallback: Option<ModelRoute>,
        dispatcher: Arc<ToolDispatcher>,
        event_bus: Arc<EventBus>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            primary,
            fallback,
            policy: ModelFallbackPolicy::from_config(&config.fallback),
            dispatcher,
            settings: TurnSettings::from_config(config),
            system_prompt: config.agent.render_system_prompt()?,
            intro: config.agent.render_intro(),
            event_bus,
        })
    }

    /// A fresh controller for one call, with an empty history.
    pub fn controller(&self, session_id: impl Into<String>, transport: Arc<dyn Transport>) -> TurnController {
        TurnController::new(
            session_id,
            MessageHistory::new(&self.system_prompt),
            self.primary.clone(),
            self.dispatcher.clone(),
            transport,
        )
        .with_fallback(self.fallback.clone())
        .with_policy(self.policy.clone())
        .with_settings(self.settings.clone())
        .with_event_bus(self.event_bus.clone())
    }
}
