//! OpenAI-compatible streaming provider.
//!
//! Works with: OpenAI, Fireworks AI, Groq, Together AI, OpenRouter, DeepSeek,
//! Ollama, vLLM, and any endpoint exposing `/v1/chat/completions` with SSE.
//!
//! Each SSE delta becomes one [`GenerationEvent`] without any accumulation:
//! tool-call assembly is the consumer's job. The reader task watches the
//! channel and drops the HTTP response as soon as the consumer goes away.

use std::fmt::Display;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use voxline_core::error::ProviderError;
use voxline_core::message::{Message, Role};
use voxline_core::provider::*;

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("{name}: {e}")))?;

        Ok(Self {
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create a Fireworks AI provider (convenience constructor).
    pub fn fireworks(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("fireworks", "https://api.fireworks.ai/inference/v1", api_key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: m.content.clone(),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!("auto");
        }

        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> Result<EventStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(provider = %self.name, model = %request.model, tools = request.tools.len(), "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status == 404 {
            return Err(ProviderError::ModelNotFound(request.model));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_sse(self.name.clone(), response.bytes_stream(), tx));
        Ok(rx)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

/// Read an SSE byte stream and forward one event per delta.
///
/// Returns (dropping `bytes`, and with it the connection) on `[DONE]`, on a
/// transport error, or as soon as the receiver is dropped.
async fn pump_sse<S, B, E>(
    provider: String,
    bytes: S,
    tx: mpsc::Sender<Result<GenerationEvent, ProviderError>>,
) where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut bytes = std::pin::pin!(bytes);
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!(provider = %provider, "Consumer abandoned stream, releasing connection");
                return;
            }
            next = bytes.next() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
            None => return,
        };

        buffer.extend_from_slice(chunk.as_ref());

        while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            // blank separators and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                return;
            }

            match decode_chunk(data) {
                Ok(events) => {
                    for event in events {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    trace!(provider = %provider, data = %data, error = %e, "Ignoring unparseable SSE chunk");
                }
            }
        }
    }
}

/// Turn one `data:` payload into generation events.
///
/// A delta carrying several tool-call entries yields one event per entry, in
/// order; content rides on the first event.
fn decode_chunk(data: &str) -> Result<Vec<GenerationEvent>, serde_json::Error> {
    let response: StreamResponse = serde_json::from_str(data)?;
    let Some(choice) = response.choices.into_iter().next() else {
        return Ok(Vec::new());
    };
    let StreamDelta { content, tool_calls } = choice.delta;

    let mut events: Vec<GenerationEvent> = tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let (name, arguments) = tc
                .function
                .map(|f| (f.name, f.arguments))
                .unwrap_or_default();
            GenerationEvent {
                content: None,
                tool_call: Some(ToolCallDelta {
                    id: tc.id,
                    kind: tc.r#type,
                    name,
                    arguments,
                }),
            }
        })
        .collect();

    if let Some(content) = content {
        match events.first_mut() {
            Some(first) => first.content = Some(content),
            None => events.push(GenerationEvent::content(content)),
        }
    }

    Ok(events)
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use voxline_core::message::MessageToolCall;

    #[test]
    fn fireworks_constructor() {
        let provider = OpenAiCompatProvider::fireworks("fw-test").unwrap();
        assert_eq!(provider.name(), "fireworks");
        assert!(provider.base_url().contains("fireworks.ai"));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let provider = OpenAiCompatProvider::new("local", "http://localhost:8000/v1/", "").unwrap();
        assert_eq!(provider.base_url(), "http://localhost:8000/v1");
    }

    #[test]
    fn message_conversion_keeps_null_content_and_tool_calls() {
        let messages = vec![
            Message::system("You are a receptionist"),
            Message::user("Can I book a visit?"),
            Message::assistant_tool_calls(
                None,
                vec![MessageToolCall {
                    id: "call_1".into(),
                    name: "find_appointments".into(),
                    arguments: "{}".into(),
                }],
            ),
            Message::tool_result("call_1", "No available slots found for the selected assignees."),
        ];
        let api = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api[0].role, "system");
        assert!(api[2].content.is_none());
        assert_eq!(api[2].tool_calls.as_ref().unwrap()[0].r#type, "function");
        assert_eq!(api[3].tool_call_id.as_deref(), Some("call_1"));

        let json = serde_json::to_value(&api[2]).unwrap();
        assert!(json["content"].is_null());
    }

    #[test]
    fn request_body_sets_tool_choice_only_with_tools() {
        let mut request = ProviderRequest {
            model: "gpt-3.5-turbo".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.0,
            max_tokens: Some(200),
            tools: vec![],
        };
        let body = OpenAiCompatProvider::request_body(&request);
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["max_tokens"], 200);
        assert_eq!(body["stream"], true);

        request.tools.push(ToolDefinition {
            name: "end_call".into(),
            description: "Hang up".into(),
            parameters: serde_json::json!({"type": "object"}),
        });
        let body = OpenAiCompatProvider::request_body(&request);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "end_call");
    }

    // --- SSE decoding ---

    #[test]
    fn content_delta_becomes_content_event() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        assert_eq!(decode_chunk(data).unwrap(), vec![GenerationEvent::content("Hello")]);
    }

    #[test]
    fn finish_chunk_yields_nothing() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert!(decode_chunk(data).unwrap().is_empty());
    }

    #[test]
    fn first_tool_fragment_carries_id_type_and_name() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","type":"function","function":{"name":"end_call","arguments":""}}]}}]}"#;
        let events = decode_chunk(data).unwrap();
        let delta = events[0].tool_call.as_ref().unwrap();
        assert_eq!(delta.id.as_deref(), Some("call_abc"));
        assert_eq!(delta.kind.as_deref(), Some("function"));
        assert_eq!(delta.name.as_deref(), Some("end_call"));
    }

    #[test]
    fn argument_fragment_has_no_id() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"message\""}}]}}]}"#;
        let events = decode_chunk(data).unwrap();
        let delta = events[0].tool_call.as_ref().unwrap();
        assert!(delta.id.is_none());
        assert_eq!(delta.arguments.as_deref(), Some("{\"message\""));
    }

    #[test]
    fn parallel_tool_entries_split_into_events() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[
            {"index":0,"id":"call_a","type":"function","function":{"name":"update_lead"}},
            {"index":1,"id":"call_b","type":"function","function":{"name":"end_call"}}
        ]}}]}"#;
        let ids: Vec<_> = decode_chunk(data)
            .unwrap()
            .into_iter()
            .map(|e| e.tool_call.unwrap().id.unwrap())
            .collect();
        assert_eq!(ids, vec!["call_a", "call_b"]);
    }

    // --- Reader task ---

    fn sse(data: &str) -> Result<Vec<u8>, Infallible> {
        Ok(format!("data: {data}\n\n").into_bytes())
    }

    #[tokio::test]
    async fn pump_forwards_until_done() {
        let body = futures::stream::iter(vec![
            sse(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#),
            // a line split across chunks
            Ok(b"data: {\"choices\":[{\"delta\":".to_vec()),
            Ok(b"{\"content\":\" there\"}}]}\n\n".to_vec()),
            sse("[DONE]"),
            sse(r#"{"choices":[{"delta":{"content":"ignored"}}]}"#),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        pump_sse("test".into(), body, tx).await;

        let mut texts = Vec::new();
        while let Some(event) = rx.recv().await {
            texts.push(event.unwrap().content.unwrap());
        }
        assert_eq!(texts, vec!["Hi", " there"]);
    }

    #[tokio::test]
    async fn pump_reports_transport_errors() {
        let body = futures::stream::iter(vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n".to_vec()),
            Err("connection reset"),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        pump_sse("test".into(), body, tx).await;

        assert!(rx.recv().await.unwrap().is_ok());
        assert!(matches!(
            rx.recv().await.unwrap(),
            Err(ProviderError::StreamInterrupted(msg)) if msg.contains("connection reset")
        ));
        assert!(rx.recv().await.is_none());
    }

    /// Signals when the body stream it lives in is dropped.
    struct DropSignal(Option<oneshot::Sender<()>>);

    impl Drop for DropSignal {
        fn drop(&mut self) {
            if let Some(tx) = self.0.take() {
                let _ = tx.send(());
            }
        }
    }

    #[tokio::test]
    async fn dropping_receiver_releases_the_body() {
        let (dropped_tx, dropped_rx) = oneshot::channel();
        let guard = DropSignal(Some(dropped_tx));

        // One content chunk, then an upstream that never finishes.
        let body = futures::stream::unfold((0u8, guard), |(step, guard)| async move {
            if step == 0 {
                Some((sse(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#), (1, guard)))
            } else {
                std::future::pending::<()>().await;
                None
            }
        });

        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(pump_sse("test".into(), body, tx));

        assert_eq!(rx.recv().await.unwrap().unwrap().content.as_deref(), Some("Hel"));
        drop(rx);

        tokio::time::timeout(Duration::from_secs(2), dropped_rx)
            .await
            .expect("body should be dropped after the receiver goes away")
            .unwrap();
        task.await.unwrap();
    }
}
