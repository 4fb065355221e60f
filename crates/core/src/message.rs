//! Message and history domain types.
//!
//! These are the value objects that flow through a call:
//! caller speaks → gateway builds a turn → turn controller appends to history →
//! provider generates the next agent utterance from a snapshot of that history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The caller
    User,
    /// The voice agent
    Assistant,
    /// System instructions (prompt, rules)
    System,
    /// Tool execution result
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content; absent on assistant messages that only call a tool
    #[serde(default)]
    pub content: Option<String>,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, Some(content.into()))
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Some(content.into()))
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, Some(content.into()))
    }

    /// An assistant message that requests tool calls, optionally with the
    /// text spoken alongside them.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<MessageToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, Some(content.into()))
        }
    }

    /// Content as a string slice, empty when absent.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

/// Append-only message log for one call session.
///
/// The first entry is always the system instruction. It can be replaced
/// through [`MessageHistory::replace_system`] but never removed, and no
/// other entry can be modified once pushed.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    messages: Vec<Message>,
}

impl MessageHistory {
    /// Seed a history with the system instruction.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Replace the content of the system instruction.
    pub fn replace_system(&mut self, system_prompt: impl Into<String>) {
        self.messages[0] = Message::system(system_prompt);
    }

    /// Append a message to the end of the log.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The system instruction text.
    pub fn system_prompt(&self) -> &str {
        self.messages[0].text()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// An owned copy of the log, used to build provider requests.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// A history always holds its system instruction.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Content of the most recent tool result.
    pub fn last_tool_result(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Tool)
            .map(Message::text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_starts_with_system_instruction() {
        let history = MessageHistory::new("You are a receptionist.");
        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].role, Role::System);
        assert_eq!(history.system_prompt(), "You are a receptionist.");
    }

    #[test]
    fn replacing_system_keeps_position_and_tail() {
        let mut history = MessageHistory::new("v1");
        history.push(Message::user("hello"));
        history.push(Message::assistant("hi there"));

        history.replace_system("v2");

        assert_eq!(history.len(), 3);
        assert_eq!(history.messages()[0].role, Role::System);
        assert_eq!(history.system_prompt(), "v2");
        assert_eq!(history.messages()[1].text(), "hello");
        assert_eq!(history.last().map(Message::text), Some("hi there"));
    }

    #[test]
    fn last_tool_result_skips_later_speech() {
        let mut history = MessageHistory::new("sys");
        assert_eq!(history.last_tool_result(), None);

        history.push(Message::tool_result("call_1", "first"));
        history.push(Message::tool_result("call_2", "second"));
        history.push(Message::assistant("done"));
        assert_eq!(history.last_tool_result(), Some("second"));
    }

    #[test]
    fn snapshot_is_detached_from_log() {
        let mut history = MessageHistory::new("sys");
        let snapshot = history.snapshot();
        history.push(Message::user("later"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn tool_call_message_serializes_null_content() {
        let msg = Message::assistant_tool_calls(
            None,
            vec![MessageToolCall {
                id: "call_1".into(),
                name: "find_appointments".into(),
                arguments: r#"{"appointmentType":"fan coil"}"#.into(),
            }],
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json["content"].is_null());
        assert_eq!(json["tool_calls"][0]["name"], "find_appointments");
    }

    #[test]
    fn tool_result_links_call_id() {
        let msg = Message::tool_result("call_9", "Appointment booked successfully!");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_9"));
    }
}
