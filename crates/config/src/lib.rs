//! Configuration loading, validation, and management for voxline.
//!
//! Loads configuration from `~/.voxline/config.toml` (or an explicit path)
//! with environment variable overrides. Validates all settings at startup.

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.voxline/config.toml`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override for the default provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Primary model settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Plain-text fallback model settings
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Per-turn behavior
    #[serde(default)]
    pub turn: TurnConfig,

    /// Prompt and intro
    #[serde(default)]
    pub agent: AgentConfig,

    /// WebSocket server
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Call records store
    #[serde(default)]
    pub records: RecordsConfig,

    /// Appointment availability rules
    #[serde(default)]
    pub scheduling: SchedulingConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("llm", &self.llm)
            .field("fallback", &self.fallback)
            .field("turn", &self.turn)
            .field("agent", &self.agent)
            .field("gateway", &self.gateway)
            .field("records", &self.records)
            .field("scheduling", &self.scheduling)
            .field("providers", &self.providers)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider serving the primary model
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Primary model: used for tool calling and follow-ups
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_max_tokens() -> u32 {
    200
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Provider serving the fallback model; defaults to `llm.provider`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Model that replaces flagged models on plain-text turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Case-insensitive substrings naming models whose plain text is discarded
    #[serde(default = "default_plain_text_patterns")]
    pub plain_text_patterns: Vec<String>,
}

fn default_plain_text_patterns() -> Vec<String> {
    vec!["llama".into()]
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            plain_text_patterns: default_plain_text_patterns(),
        }
    }
}

impl FallbackConfig {
    pub fn flags(&self, model: &str) -> bool {
        matches_plain_text_pattern(&self.plain_text_patterns, model)
    }
}

/// True when any non-blank pattern is a case-insensitive substring of `model`.
pub fn matches_plain_text_pattern<S: AsRef<str>>(patterns: &[S], model: &str) -> bool {
    let model = model.to_lowercase();
    patterns.iter().any(|p| {
        let p = p.as_ref().trim();
        !p.is_empty() && model.contains(&p.to_lowercase())
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Whole-turn deadline in seconds; 0 disables it
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// Synthetic user message appended when the caller has gone quiet
    #[serde(default = "default_reminder_prompt")]
    pub reminder_prompt: String,
}

fn default_deadline_secs() -> u64 {
    30
}
fn default_reminder_prompt() -> String {
    "(Now the user has not responded in a while, you would say:)".into()
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            reminder_prompt: default_reminder_prompt(),
        }
    }
}

impl TurnConfig {
    pub fn deadline(&self) -> Option<std::time::Duration> {
        (self.deadline_secs > 0).then(|| std::time::Duration::from_secs(self.deadline_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Inline system prompt
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// General prompt file prepended to `system_prompt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<PathBuf>,

    /// First thing the agent says when a call connects
    #[serde(default = "default_intro_message")]
    pub intro_message: String,

    /// Values substituted for `{name}` placeholders in the prompt and intro
    #[serde(default)]
    pub prompt_variables: BTreeMap<String, String>,
}

fn default_system_prompt() -> String {
    concat!(
        "You are a friendly phone receptionist for a home services company. ",
        "Keep replies short and conversational. Collect the caller's details with ",
        "update_lead, offer times with find_appointments, confirm before calling ",
        "book_appointment, and use end_call to say goodbye."
    )
    .into()
}
fn default_intro_message() -> String {
    "Hey, how's it going?".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            system_prompt_file: None,
            intro_message: default_intro_message(),
            prompt_variables: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    /// The full system instruction: prompt file (if any) followed by the
    /// inline prompt, with variables substituted.
    pub fn render_system_prompt(&self) -> Result<String, ConfigError> {
        let mut prompt = String::new();
        if let Some(path) = &self.system_prompt_file {
            prompt = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            if !prompt.ends_with('\n') {
                prompt.push('\n');
            }
        }
        prompt.push_str(&self.system_prompt);
        Ok(render_template(&prompt, &self.prompt_variables))
    }

    pub fn render_intro(&self) -> String {
        render_template(&self.intro_message, &self.prompt_variables)
    }
}

/// Replace `{name}` with `vars[name]`. Unknown placeholders are kept.
pub fn render_template(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if vars.contains_key(&after[..close]) => {
                out.push_str(&vars[&after[..close]]);
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8080
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsConfig {
    /// `memory` or `sqlite`
    #[serde(default = "default_records_backend")]
    pub backend: String,

    /// SQLite database file; defaults to `~/.voxline/voxline.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_records_backend() -> String {
    "sqlite".into()
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            backend: default_records_backend(),
            path: None,
        }
    }
}

impl RecordsConfig {
    pub fn database_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("voxline.db"))
    }
}

/// Which technicians handle an appointment type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssigneeRule {
    /// Case-insensitive substring of the requested appointment type
    pub matches: String,
    pub assignees: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Offset of the business's local time from UTC
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    #[serde(default = "default_slot_hours")]
    pub slot_hours: u32,

    /// Days searched, starting tomorrow
    #[serde(default = "default_days_ahead")]
    pub days_ahead: u32,

    #[serde(default = "default_max_slots")]
    pub max_slots: usize,

    #[serde(default = "default_assignees")]
    pub default_assignees: Vec<String>,

    /// First matching rule wins
    #[serde(default)]
    pub assignees: Vec<AssigneeRule>,

    /// Local `"HH:MM-HH:MM"` window per weekday name; missing days are closed
    #[serde(default = "default_working_hours")]
    pub working_hours: BTreeMap<String, String>,
}

fn default_utc_offset_hours() -> i32 {
    -5
}
fn default_slot_hours() -> u32 {
    2
}
fn default_days_ahead() -> u32 {
    14
}
fn default_max_slots() -> usize {
    100
}
fn default_working_hours() -> BTreeMap<String, String> {
    ["monday", "tuesday", "wednesday", "thursday", "friday"]
        .into_iter()
        .map(|day| (day.to_string(), "08:00-16:00".to_string()))
        .collect()
}
fn default_assignees() -> Vec<String> {
    vec!["On-call Technician".into()]
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset_hours(),
            slot_hours: default_slot_hours(),
            days_ahead: default_days_ahead(),
            max_slots: default_max_slots(),
            default_assignees: default_assignees(),
            assignees: Vec::new(),
            working_hours: default_working_hours(),
        }
    }
}

impl SchedulingConfig {
    /// Parsed working windows keyed by weekday.
    pub fn windows(&self) -> Result<Vec<(Weekday, NaiveTime, NaiveTime)>, ConfigError> {
        self.working_hours
            .iter()
            .map(|(day, window)| {
                let weekday: Weekday = day.parse().map_err(|_| {
                    ConfigError::ValidationError(format!("unknown weekday '{day}' in working_hours"))
                })?;
                let (start, end) = parse_window(window)?;
                Ok((weekday, start, end))
            })
            .collect()
    }
}

fn parse_window(window: &str) -> Result<(NaiveTime, NaiveTime), ConfigError> {
    let invalid = || ConfigError::ValidationError(format!("invalid working hours '{window}', expected HH:MM-HH:MM"));
    let (start, end) = window.split_once('-').ok_or_else(invalid)?;
    let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").map_err(|_| invalid())?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").map_err(|_| invalid())?;
    if start >= end {
        return Err(ConfigError::ValidationError(format!(
            "working hours '{window}' must start before they end"
        )));
    }
    Ok((start, end))
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.voxline/config.toml).
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with(Some(&config_path))
    }

    /// Load from `path` (or the default location) and apply environment overrides.
    ///
    /// Environment variables:
    /// - `VOXLINE_API_KEY`, then `OPENAI_API_KEY`
    /// - `VOXLINE_MODEL`, `VOXLINE_FALLBACK_MODEL`, `VOXLINE_PORT`
    pub fn load_with(path: Option<&Path>) -> Result<Self, ConfigError> {
        let default_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(path.unwrap_or(&default_path))?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("VOXLINE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }
        if let Ok(model) = std::env::var("VOXLINE_MODEL") {
            config.llm.model = model;
        }
        if let Ok(model) = std::env::var("VOXLINE_FALLBACK_MODEL") {
            config.fallback.model = Some(model);
        }
        if let Ok(port) = std::env::var("VOXLINE_PORT") {
            config.gateway.port = port
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("VOXLINE_PORT '{port}' is not a port")))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".voxline")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.llm.max_tokens == 0 {
            return Err(ConfigError::ValidationError("llm.max_tokens must be > 0".into()));
        }

        if self.agent.intro_message.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "agent.intro_message must not be empty".into(),
            ));
        }

        if self.scheduling.slot_hours == 0 {
            return Err(ConfigError::ValidationError(
                "scheduling.slot_hours must be > 0".into(),
            ));
        }

        if !(-12..=14).contains(&self.scheduling.utc_offset_hours) {
            return Err(ConfigError::ValidationError(
                "scheduling.utc_offset_hours must be between -12 and 14".into(),
            ));
        }

        self.scheduling.windows()?;

        if !matches!(self.records.backend.as_str(), "memory" | "sqlite") {
            return Err(ConfigError::ValidationError(format!(
                "records.backend must be 'memory' or 'sqlite', got '{}'",
                self.records.backend
            )));
        }

        if self.fallback.model.is_none() && self.fallback.flags(&self.llm.model) {
            tracing::warn!(
                model = %self.llm.model,
                "Primary model is flagged for plain-text fallback but no fallback.model is set; its text will be spoken as-is"
            );
        }

        Ok(())
    }

    /// Provider serving the fallback model.
    pub fn fallback_provider(&self) -> &str {
        self.fallback.provider.as_deref().unwrap_or(&self.llm.provider)
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
            || self.providers.values().any(|p| p.api_key.is_some())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
