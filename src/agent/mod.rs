//! Conversational engine
//!
//! The dispatcher talks to the large model only through
//! [`ConversationEngine`]; [`OpenAiEngine`] streams chat completions and turns
//! them into sentences and tool calls.

mod engine;
mod openai;
mod sentence;

pub use engine::{
    ChatMessage, ConversationEngine, EngineEvent, EventStream, Role, ToolCall, ToolSpec,
};
pub use openai::{OpenAiEngine, SseDecoder};
pub use sentence::SentenceBuffer;
