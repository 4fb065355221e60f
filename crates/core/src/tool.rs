//! Tool kinds and accumulated tool calls.
//!
//! The agent can take a fixed set of business actions during a call. They are
//! a closed enum so every dispatch site is checked exhaustively: adding a
//! tool means adding a variant and handling it everywhere.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::message::MessageToolCall;

/// The closed set of actions the agent can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Say goodbye and hang up.
    EndCall,
    /// Record caller details on the call.
    UpdateLead,
    /// List open appointment slots.
    FindAppointments,
    /// Reserve a slot and link it to the call.
    BookAppointment,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::EndCall,
        ToolKind::UpdateLead,
        ToolKind::FindAppointments,
        ToolKind::BookAppointment,
    ];

    /// The function name the model sees.
    pub fn name(self) -> &'static str {
        match self {
            ToolKind::EndCall => "end_call",
            ToolKind::UpdateLead => "update_lead",
            ToolKind::FindAppointments => "find_appointments",
            ToolKind::BookAppointment => "book_appointment",
        }
    }

    /// Whether invoking this tool terminates the call.
    pub fn ends_call(self) -> bool {
        matches!(self, ToolKind::EndCall)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ToolKind {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "end_call" => Ok(ToolKind::EndCall),
            // older prompts still name the lead tool this way
            "update_lead" | "update_call_lead" => Ok(ToolKind::UpdateLead),
            "find_appointments" => Ok(ToolKind::FindAppointments),
            "book_appointment" => Ok(ToolKind::BookAppointment),
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}

/// A tool invocation accumulated from a generation stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Call id assigned by the model
    pub id: String,

    /// Function name as declared by the model
    pub name: String,

    /// Argument text exactly as streamed
    pub raw_arguments: String,

    /// Parsed arguments; empty until the call is finalized
    pub arguments: serde_json::Map<String, serde_json::Value>,

    /// Textual result produced by dispatch
    pub result: Option<String>,

    /// Set by dispatch when the call should end
    pub ends_call: bool,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments: String::new(),
            arguments: serde_json::Map::new(),
            result: None,
            ends_call: false,
        }
    }

    pub fn kind(&self) -> Result<ToolKind, ToolError> {
        self.name.parse()
    }

    /// Non-empty string argument under any of `keys`, first match wins.
    pub fn str_arg(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.arguments.get(*key))
            .filter_map(serde_json::Value::as_str)
            .map(str::trim)
            .find(|value| !value.is_empty())
    }

    /// The utterance the model attached to the call, spoken before dispatch.
    pub fn message(&self) -> Option<&str> {
        self.str_arg(&["message"])
    }

    /// Form recorded in history alongside the assistant turn.
    pub fn to_message_call(&self) -> MessageToolCall {
        MessageToolCall {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self.raw_arguments.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip_through_from_str() {
        for kind in ToolKind::ALL {
            assert_eq!(kind.name().parse::<ToolKind>().unwrap(), kind);
        }
    }

    #[test]
    fn legacy_lead_name_is_accepted() {
        assert_eq!("update_call_lead".parse::<ToolKind>().unwrap(), ToolKind::UpdateLead);
    }

    #[test]
    fn unknown_tool_name_is_rejected() {
        let err = "transfer_call".parse::<ToolKind>().unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "transfer_call"));
    }

    #[test]
    fn only_end_call_ends_the_call() {
        let ending: Vec<_> = ToolKind::ALL.into_iter().filter(|k| k.ends_call()).collect();
        assert_eq!(ending, vec![ToolKind::EndCall]);
    }

    #[test]
    fn str_arg_skips_blank_values_and_honors_aliases() {
        let mut call = ToolCall::new("c1", "book_appointment");
        call.arguments.insert("appointmentStart".into(), "  ".into());
        call.arguments.insert("appointment_start".into(), "2024-05-10 09:00".into());
        assert_eq!(
            call.str_arg(&["appointmentStart", "appointment_start"]),
            Some("2024-05-10 09:00")
        );
        assert_eq!(call.message(), None);
    }
}
