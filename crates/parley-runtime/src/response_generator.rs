use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use parley_ai::{ChatRequest, LlmClient, Message};

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub presence_penalty: f32,
    pub max_tokens: Option<u32>,
    pub completion_timeout: Duration,
}

#[derive(Clone)]
pub struct ResponseGenerator {
    client: Arc<dyn LlmClient>,
    settings: GenerationSettings,
}

impl ResponseGenerator {
    pub fn new(client: Arc<dyn LlmClient>, settings: GenerationSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Requests a completion for `messages` under `instruction`.
    ///
    /// Returns `Ok(None)` when the service answers with no usable text.
    pub async fn generate(&self, instruction: &str, messages: Vec<Message>) -> Result<Option<String>> {
        let mut transcript = Vec::with_capacity(messages.len() + 1);
        transcript.push(Message::system(instruction));
        transcript.extend(messages);
        let request = ChatRequest {
            model: self.settings.model.clone(),
            messages: transcript,
            temperature: Some(self.settings.temperature),
            presence_penalty: Some(self.settings.presence_penalty),
            max_tokens: self.settings.max_tokens,
        };
        let message_count = request.messages.len();

        let timeout = self.settings.completion_timeout;
        let response = tokio::time::timeout(timeout, self.client.complete(request))
            .await
            .map_err(|_| anyhow!("completion timed out after {} ms", timeout.as_millis()))?
            .context("completion request failed")?;

        tracing::debug!(
            model = %self.settings.model,
            messages = message_count,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish_reason = response.finish_reason.as_deref().unwrap_or("unknown"),
            "completion received"
        );
        Ok(response.text().and_then(clean_completion_text))
    }
}

/// Trims the completion and drops a trailing `<|tag|>` end marker.
pub fn clean_completion_text(raw: &str) -> Option<String> {
    let mut text = raw.trim();
    if let Some(before_close) = text.strip_suffix("|>") {
        if let Some(open) = before_close.rfind("<|") {
            let tag = &before_close[open + 2..];
            if !tag.is_empty() && !tag.contains(char::is_whitespace) {
                text = before_close[..open].trim();
            }
        }
    }
    (!text.is_empty()).then(|| text.to_string())
}
