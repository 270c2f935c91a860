//! Streaming chat completions against an OpenAI-compatible API

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::agent::engine::{
    ChatMessage, ConversationEngine, EngineEvent, EventStream, ToolCall, ToolSpec,
};
use crate::agent::sentence::SentenceBuffer;
use crate::{Error, Result};

/// Buffered events between the SSE reader task and the dispatcher
const EVENT_BUFFER: usize = 32;

/// Parallel tool calls accepted in one response
const MAX_TOOL_CALLS: usize = 16;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall<'a>,
}

#[derive(Serialize)]
struct WireFunctionCall<'a> {
    name: &'a str,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireToolFunction<'a>,
}

#[derive(Serialize)]
struct WireToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(msg: &'a ChatMessage) -> Self {
        Self {
            role: msg.role.as_str(),
            content: msg.content.as_deref(),
            tool_calls: msg
                .tool_calls
                .iter()
                .map(|tc| WireToolCall {
                    id: &tc.id,
                    kind: "function",
                    function: WireFunctionCall {
                        name: &tc.name,
                        arguments: tc.arguments.to_string(),
                    },
                })
                .collect(),
            tool_call_id: msg.tool_call_id.as_deref(),
        }
    }
}

impl<'a> From<&'a ToolSpec> for WireTool<'a> {
    fn from(spec: &'a ToolSpec) -> Self {
        Self {
            kind: "function",
            function: WireToolFunction {
                name: &spec.name,
                description: &spec.description,
                parameters: &spec.parameters,
            },
        }
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// In-progress tool call being assembled from streaming events
#[derive(Default, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental SSE decoder for one chat completion stream
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    sentences: SentenceBuffer,
    tool_calls: Vec<PendingToolCall>,
    done: bool,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `data: [DONE]` has been seen
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes and return the sentences they completed
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<EngineEvent> {
        // split on raw bytes so multi-byte characters cut across reads survive
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();

            if line.is_empty() {
                continue;
            }
            if line == "data: [DONE]" {
                self.done = true;
                continue;
            }
            let Some(json_str) = line.strip_prefix("data:") else {
                continue;
            };

            match serde_json::from_str::<StreamChunk>(json_str.trim_start()) {
                Ok(chunk) => self.apply(chunk, &mut events),
                Err(e) => tracing::debug!(error = %e, "skipping malformed stream chunk"),
            }
        }
        events
    }

    fn apply(&mut self, chunk: StreamChunk, events: &mut Vec<EngineEvent>) {
        let Some(delta) = chunk.choices.into_iter().next().and_then(|c| c.delta) else {
            return;
        };

        if let Some(content) = delta.content {
            events.extend(self.sentences.push(&content).into_iter().map(EngineEvent::Text));
        }

        for tc in delta.tool_calls.unwrap_or_default() {
            if tc.index >= MAX_TOOL_CALLS {
                tracing::warn!(index = tc.index, "ignoring out-of-range tool call index");
                continue;
            }
            if tc.index >= self.tool_calls.len() {
                self.tool_calls
                    .resize_with(tc.index + 1, PendingToolCall::default);
            }
            let pending = &mut self.tool_calls[tc.index];
            if let Some(id) = tc.id {
                pending.id = id;
            }
            if let Some(function) = tc.function {
                if let Some(name) = function.name {
                    pending.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    pending.arguments.push_str(&arguments);
                }
            }
        }
    }

    /// Flush trailing text and emit assembled tool calls
    ///
    /// Tool calls whose arguments are not valid JSON are dropped.
    pub fn finish(&mut self) -> Vec<EngineEvent> {
        let mut events: Vec<EngineEvent> =
            self.sentences.finish().map(EngineEvent::Text).into_iter().collect();

        for pending in std::mem::take(&mut self.tool_calls) {
            if pending.name.is_empty() {
                continue;
            }
            let raw = if pending.arguments.trim().is_empty() {
                "{}"
            } else {
                pending.arguments.as_str()
            };
            match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(arguments) => events.push(EngineEvent::ToolCall(ToolCall {
                    id: pending.id,
                    name: pending.name,
                    arguments,
                })),
                Err(e) => tracing::warn!(
                    tool = %pending.name,
                    error = %e,
                    "dropping tool call with malformed arguments"
                ),
            }
        }
        events
    }
}

/// Conversational engine backed by streaming chat completions
pub struct OpenAiEngine {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiEngine {
    /// Create a new engine
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, base_url: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for the LLM".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }
}

#[async_trait]
impl ConversationEngine for OpenAiEngine {
    async fn respond(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<EventStream> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            stream: true,
            tools: tools.iter().map(WireTool::from).collect(),
        };

        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "starting chat completion"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Engine(format!("chat completion error {status}: {body}")));
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(Error::Engine(e.to_string()))).await;
                        return;
                    }
                };
                for event in decoder.feed(&chunk) {
                    if tx.send(Ok(event)).await.is_err() {
                        tracing::debug!("response abandoned by consumer");
                        return;
                    }
                }
                if decoder.is_done() {
                    break;
                }
            }

            for event in decoder.finish() {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(json: &str) -> String {
        format!("data: {json}\n\n")
    }

    #[test]
    fn test_text_deltas_become_sentences() {
        let mut dec = SseDecoder::new();
        let mut events = dec.feed(
            sse(r#"{"choices":[{"delta":{"content":"Hi there. "}}]}"#).as_bytes(),
        );
        events.extend(dec.feed(sse(r#"{"choices":[{"delta":{"content":"Ready"}}]}"#).as_bytes()));
        events.extend(dec.feed(b"data: [DONE]\n"));
        assert!(dec.is_done());
        events.extend(dec.finish());

        assert_eq!(
            events,
            vec![
                EngineEvent::Text("Hi there.".to_string()),
                EngineEvent::Text("Ready".to_string()),
            ]
        );
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let mut dec = SseDecoder::new();
        let line = sse(r#"{"choices":[{"delta":{"content":"Okay. "}}]}"#);
        let (a, b) = line.split_at(10);
        assert!(dec.feed(a.as_bytes()).is_empty());
        assert_eq!(dec.feed(b.as_bytes()), vec![EngineEvent::Text("Okay.".to_string())]);
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let mut dec = SseDecoder::new();
        let line = sse(r#"{"choices":[{"delta":{"content":"Café ok. "}}]}"#);
        let bytes = line.as_bytes();
        let cut = line.find('é').unwrap() + 1;
        assert!(dec.feed(&bytes[..cut]).is_empty());
        assert_eq!(
            dec.feed(&bytes[cut..]),
            vec![EngineEvent::Text("Café ok.".to_string())]
        );
    }

    #[test]
    fn test_tool_call_assembled_from_deltas() {
        let mut dec = SseDecoder::new();
        dec.feed(
            sse(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"send_message_to_computer_agent","arguments":"{\"mess"}}]}}]}"#)
                .as_bytes(),
        );
        dec.feed(
            sse(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"age\":\"Alex\"}"}}]}}]}"#)
                .as_bytes(),
        );

        let events = dec.finish();
        assert_eq!(events.len(), 1);
        let EngineEvent::ToolCall(call) = &events[0] else {
            panic!("expected tool call");
        };
        assert_eq!(call.id, "call_1");
        assert_eq!(call.name, "send_message_to_computer_agent");
        assert_eq!(call.arguments["message"], "Alex");
    }

    #[test]
    fn test_out_of_range_tool_index_ignored() {
        let mut dec = SseDecoder::new();
        dec.feed(
            sse(r#"{"choices":[{"delta":{"tool_calls":[{"index":4000000000,"id":"c","function":{"name":"x","arguments":"{}"}}]}}]}"#)
                .as_bytes(),
        );
        assert!(dec.tool_calls.is_empty());
        assert!(dec.finish().is_empty());
    }

    #[test]
    fn test_malformed_tool_arguments_dropped() {
        let mut dec = SseDecoder::new();
        dec.feed(
            sse(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"x","arguments":"{oops"}}]}}]}"#)
                .as_bytes(),
        );
        assert!(dec.finish().is_empty());
    }

    #[test]
    fn test_wire_message_serialization() {
        let msg = ChatMessage::assistant_tool_calls(
            None,
            vec![ToolCall {
                id: "call_9".to_string(),
                name: "send_message_to_computer_agent".to_string(),
                arguments: serde_json::json!({"message": "hi"}),
            }],
        );
        let value = serde_json::to_value(WireMessage::from(&msg)).unwrap();

        assert_eq!(value["role"], "assistant");
        assert!(value.get("content").is_none());
        assert_eq!(value["tool_calls"][0]["type"], "function");
        assert_eq!(
            value["tool_calls"][0]["function"]["arguments"],
            r#"{"message":"hi"}"#
        );
    }

    #[test]
    fn test_missing_key_rejected() {
        let result = OpenAiEngine::new(String::new(), "u".to_string(), "m".to_string());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
