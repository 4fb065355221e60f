//! Decides when a primary model's plain-text answer is replaced by the
//! fallback model's.

use voxline_config::{FallbackConfig, matches_plain_text_pattern};

/// Models matching any pattern are trusted for tool calls but not for
/// plain conversational text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFallbackPolicy {
    patterns: Vec<String>,
}

impl ModelFallbackPolicy {
    /// Patterns are case-insensitive substrings of the model name.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &FallbackConfig) -> Self {
        Self::new(&config.plain_text_patterns)
    }

    /// Never falls back.
    pub fn disabled() -> Self {
        Self { patterns: Vec::new() }
    }

    pub fn flags(&self, model: &str) -> bool {
        matches_plain_text_pattern(&self.patterns, model)
    }

    /// True only for a flagged model on a turn with no tool call.
    pub fn should_fallback(&self, primary_model: &str, turn_had_tool_call: bool) -> bool {
        !turn_had_tool_call && self.flags(primary_model)
    }
}

impl Default for ModelFallbackPolicy {
    fn default() -> Self {
        Self::from_config(&FallbackConfig::default())
    }
}
