use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::retry::{
    is_retryable_transport_error, new_request_id, parse_retry_after_ms, retry_budget_allows,
    retry_delay_ms, should_retry_status,
};
use crate::{ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, ParleyAiError};

#[derive(Debug, Clone)]
/// Connection settings for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub organization: Option<String>,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_budget_ms: u64,
    pub retry_jitter: bool,
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, ParleyAiError> {
        let api_key = config.api_key.trim();
        if api_key.is_empty() {
            return Err(ParleyAiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|error| {
                ParleyAiError::InvalidResponse(format!("invalid API key header: {error}"))
            })?,
        );
        if let Some(organization) = config.organization.as_deref() {
            headers.insert(
                "OpenAI-Organization",
                HeaderValue::from_str(organization).map_err(|error| {
                    ParleyAiError::InvalidResponse(format!("invalid organization header: {error}"))
                })?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self { http, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/chat/completions")
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ParleyAiError> {
        let body = build_chat_request_body(&request)?;
        let url = self.chat_completions_url();
        let started = Instant::now();
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            let request_id = new_request_id();
            tracing::debug!(
                model = request.model.as_str(),
                messages = request.messages.len(),
                attempt,
                request_id = request_id.as_str(),
                "sending chat completion request"
            );
            let sent = self
                .http
                .post(&url)
                .header("x-parley-request-id", request_id)
                .header("x-parley-retry-attempt", attempt.to_string())
                .json(&body)
                .send()
                .await;

            let delay_ms = match sent {
                Ok(response) if response.status().is_success() => {
                    let raw = response.text().await?;
                    return parse_chat_response(&raw);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt >= max_retries || !should_retry_status(status) {
                        return Err(ParleyAiError::HttpStatus { status, body });
                    }
                    let delay_ms =
                        retry_delay_ms(attempt, self.config.retry_jitter, retry_after_ms);
                    if !self.budget_allows(started, delay_ms) {
                        return Err(ParleyAiError::HttpStatus { status, body });
                    }
                    tracing::warn!(status, attempt, delay_ms, "retrying completion request");
                    delay_ms
                }
                Err(error) => {
                    if attempt >= max_retries || !is_retryable_transport_error(&error) {
                        return Err(ParleyAiError::Http(error));
                    }
                    let delay_ms = retry_delay_ms(attempt, self.config.retry_jitter, None);
                    if !self.budget_allows(started, delay_ms) {
                        return Err(ParleyAiError::Http(error));
                    }
                    tracing::warn!(%error, attempt, delay_ms, "retrying completion request");
                    delay_ms
                }
            };
            sleep(Duration::from_millis(delay_ms)).await;
        }

        Err(ParleyAiError::InvalidResponse(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }
}

impl OpenAiClient {
    fn budget_allows(&self, started: Instant, delay_ms: u64) -> bool {
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        retry_budget_allows(elapsed_ms, delay_ms, self.config.retry_budget_ms)
    }
}

fn build_chat_request_body(request: &ChatRequest) -> Result<Value, ParleyAiError> {
    if request.messages.is_empty() {
        return Err(ParleyAiError::InvalidResponse(
            "chat request must contain at least one message".to_string(),
        ));
    }
    let messages = request
        .messages
        .iter()
        .map(to_openai_message)
        .collect::<Vec<_>>();
    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(presence_penalty) = request.presence_penalty {
        body["presence_penalty"] = json!(presence_penalty);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    Ok(body)
}

fn to_openai_message(message: &Message) -> Value {
    let mut value = json!({
        "role": message.role.as_str(),
        "content": message.content,
    });
    if let Some(name) = message.name.as_deref().filter(|name| !name.is_empty()) {
        value["name"] = Value::String(name.to_string());
    }
    value
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    message: Option<OpenAiChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

fn parse_chat_response(raw: &str) -> Result<ChatResponse, ParleyAiError> {
    let parsed: OpenAiChatResponse = serde_json::from_str(raw)?;
    let usage = parsed
        .usage
        .map(|usage| ChatUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
        .unwrap_or_default();

    let Some(choice) = parsed.choices.into_iter().next() else {
        return Ok(ChatResponse {
            content: None,
            finish_reason: None,
            usage,
        });
    };
    let content = choice
        .message
        .and_then(|message| message.content)
        .and_then(|content| flatten_content(&content));
    Ok(ChatResponse {
        content,
        finish_reason: choice.finish_reason,
        usage,
    })
}

/// Accepts both plain-string content and the array-of-parts shape some
/// compatible backends return.
fn flatten_content(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let texts = parts
                .iter()
                .filter_map(|part| match part {
                    Value::String(text) => Some(text.as_str()),
                    Value::Object(object) => object.get("text").and_then(Value::as_str),
                    _ => None,
                })
                .collect::<Vec<_>>();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join(""))
            }
        }
        _ => None,
    }
}
