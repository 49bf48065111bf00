//! Wires CLI configuration into the forum client, completion client,
//! instruction store and mention bridge.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use parley_ai::{OpenAiClient, OpenAiConfig};
use parley_context::{ContextBudget, FileInstructionBackend, TopicInstructionStore};
use parley_forum::{ForumProvider, NodeBbClient, NodeBbConfig};
use parley_runtime::{
    run_mention_bridge, GenerationSettings, HandlerSettings, MentionBridgeConfig,
    NotificationHandler, ResponseGenerator,
};

use crate::cli_args::Cli;

const INSTRUCTIONS_DIR_NAME: &str = "instructions";
const BRIDGE_STATE_FILE_NAME: &str = "state.json";
const FORUM_RETRY_BASE_DELAY_MS: u64 = 500;

pub(crate) fn default_instruction_for(bot_username: &str) -> String {
    format!(
        "You are {bot_username}, an assistant taking part in a discussion forum thread. \
Each user message carries the author's username. Reply with only the markdown text \
of your forum post. Do not prefix usernames with @ unless you mean to notify them."
    )
}

/// Picks the completion API key from the flag/`PARLEY_API_KEY`, then `fallback`.
pub(crate) fn resolve_api_key(explicit: Option<&str>, fallback: Option<String>) -> Result<String> {
    let candidate = explicit
        .map(str::to_string)
        .or(fallback)
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty());
    match candidate {
        Some(key) => Ok(key),
        None => bail!("missing completion API key: set --api-key, PARLEY_API_KEY or OPENAI_API_KEY"),
    }
}

pub(crate) fn resolve_default_instruction(cli: &Cli) -> Result<String> {
    if let Some(path) = cli.default_instruction_file.as_deref() {
        return read_instruction_file(path);
    }
    match cli.default_instruction.as_deref().map(str::trim) {
        Some(instruction) if !instruction.is_empty() => Ok(instruction.to_string()),
        Some(_) => bail!("--default-instruction cannot be empty"),
        None => Ok(default_instruction_for(cli.bot_username.trim())),
    }
}

fn read_instruction_file(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read default instruction {}", path.display()))?;
    let instruction = raw.trim();
    if instruction.is_empty() {
        bail!("default instruction file {} is empty", path.display());
    }
    Ok(instruction.to_string())
}

pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
    if cli.forum_base_url.trim().is_empty() {
        bail!("--forum-base-url cannot be empty");
    }
    if cli.forum_token.trim().is_empty() {
        bail!("--forum-token cannot be empty");
    }
    if cli.bot_username.trim().is_empty() {
        bail!("--bot-username cannot be empty");
    }
    if cli.model.trim().is_empty() {
        bail!("--model cannot be empty");
    }
    Ok(())
}

pub(crate) async fn run_from_cli(cli: Cli) -> Result<()> {
    validate_cli(&cli)?;
    let api_key = resolve_api_key(cli.api_key.as_deref(), std::env::var("OPENAI_API_KEY").ok())?;
    let default_instruction = resolve_default_instruction(&cli)?;

    let forum_client = NodeBbClient::new(NodeBbConfig {
        base_url: cli.forum_base_url.trim().to_string(),
        api_token: cli.forum_token.clone(),
        request_timeout_ms: cli.request_timeout_ms,
        retry_max_attempts: cli.forum_retry_max_attempts,
        retry_base_delay_ms: FORUM_RETRY_BASE_DELAY_MS,
        min_request_interval_ms: cli.forum_min_request_interval_ms,
    })?
    .with_robots_crawl_delay()
    .await;
    let forum: Arc<dyn ForumProvider> = Arc::new(forum_client);
    let llm = OpenAiClient::new(OpenAiConfig {
        api_base: cli.api_base.clone(),
        api_key,
        organization: None,
        request_timeout_ms: cli.request_timeout_ms,
        max_retries: cli.provider_max_retries,
        retry_budget_ms: cli.completion_timeout_ms,
        retry_jitter: true,
    })
    .context("failed to create completion client")?;

    let instructions = TopicInstructionStore::new(
        Arc::new(FileInstructionBackend::new(
            cli.state_dir.join(INSTRUCTIONS_DIR_NAME),
        )),
        default_instruction,
    );
    let generator = ResponseGenerator::new(
        Arc::new(llm),
        GenerationSettings {
            model: cli.model.trim().to_string(),
            temperature: cli.temperature,
            presence_penalty: cli.presence_penalty,
            max_tokens: cli.max_tokens,
            completion_timeout: Duration::from_millis(cli.completion_timeout_ms),
        },
    );
    let handler = NotificationHandler::new(
        forum.clone(),
        instructions,
        generator,
        cli.bot_username.trim(),
        HandlerSettings {
            post_limit: cli.post_limit,
            budget: ContextBudget::new(cli.character_limit, cli.min_messages),
            reply_max_chars: cli.reply_max_chars,
        },
    );

    tracing::info!(
        forum = %cli.forum_base_url,
        model = %cli.model,
        bot_username = %cli.bot_username,
        state_dir = %cli.state_dir.display(),
        poll_once = cli.poll_once,
        "starting parley mention bridge"
    );
    run_mention_bridge(
        MentionBridgeConfig {
            state_path: cli.state_dir.join(BRIDGE_STATE_FILE_NAME),
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
            poll_once: cli.poll_once,
            processed_notification_cap: cli.processed_notification_cap,
            max_concurrent_runs: cli.max_concurrent_runs,
        },
        forum,
        handler,
    )
    .await
}
