//! Completion-service client surface for Parley.
//!
//! Exposes the role-tagged chat types, the `LlmClient` seam used by the bot
//! runtime, and an OpenAI-compatible HTTP client with transport retries.
mod openai;
mod retry;
mod types;

pub use openai::{OpenAiClient, OpenAiConfig};
pub use types::{
    ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, MessageRole, ParleyAiError,
};
