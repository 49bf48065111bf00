//! Per-mention orchestration: collect, budget, generate, sanitize, reply.

use std::sync::Arc;

use anyhow::{Context, Result};
use parley_context::{
    sanitize_reply, split_prose_and_directives, ContextBudget, ContextCollector,
    TopicInstructionStore,
};
use parley_core::{char_count, truncate_with_ellipsis};
use parley_forum::{normalize_post_html, ForumProvider, MentionNotification};

use crate::response_generator::ResponseGenerator;

pub const DEFAULT_REPLY_MAX_CHARS: usize = 32_000;
const SHOW_INSTRUCTION_PREFIX: &str = "> ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerSettings {
    pub post_limit: usize,
    pub budget: ContextBudget,
    pub reply_max_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    ShowedInstruction,
    Replied { reply_chars: usize },
    NoReply,
}

#[derive(Clone)]
pub struct NotificationHandler {
    provider: Arc<dyn ForumProvider>,
    instructions: TopicInstructionStore,
    collector: ContextCollector,
    generator: ResponseGenerator,
    settings: HandlerSettings,
}

impl NotificationHandler {
    pub fn new(
        provider: Arc<dyn ForumProvider>,
        instructions: TopicInstructionStore,
        generator: ResponseGenerator,
        bot_username: &str,
        settings: HandlerSettings,
    ) -> Self {
        let collector = ContextCollector::new(provider.clone(), instructions.clone(), bot_username);
        Self {
            provider,
            instructions,
            collector,
            generator,
            settings,
        }
    }

    /// Handles one mention. Failures are reported to the forum's error
    /// channel once and then returned.
    pub async fn handle(&self, mention: &MentionNotification) -> Result<HandlerOutcome> {
        match self.run(mention).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                let context = format!(
                    "mention {} in topic {} post {}",
                    mention.notification_id, mention.topic_id, mention.post_id
                );
                self.provider.report_error(&context, &error).await;
                Err(error)
            }
        }
    }

    async fn run(&self, mention: &MentionNotification) -> Result<HandlerOutcome> {
        let topic_id = mention.topic_id;
        let trigger = self
            .provider
            .get_post(mention.post_id)
            .await
            .with_context(|| format!("failed to load triggering post {}", mention.post_id))?;

        let trigger_text = normalize_post_html(&trigger.content);
        if split_prose_and_directives(&trigger_text).requests_instruction() {
            let instruction = self.instructions.get(topic_id);
            let reply = format!("{SHOW_INSTRUCTION_PREFIX}{instruction}");
            self.post_reply(topic_id, mention.post_id, &reply).await?;
            tracing::info!(topic_id, post_id = mention.post_id, "posted topic instruction");
            return Ok(HandlerOutcome::ShowedInstruction);
        }

        let messages = self.collector.collect(topic_id, self.settings.post_limit).await?;
        let collected = messages.len();
        let messages = self.settings.budget.apply(messages);
        let instruction = self.instructions.get(topic_id);
        tracing::debug!(
            topic_id,
            post_id = mention.post_id,
            collected,
            budgeted = messages.len(),
            "requesting completion"
        );

        let Some(generated) = self.generator.generate(&instruction, messages).await? else {
            tracing::info!(topic_id, post_id = mention.post_id, "completion was empty; not replying");
            return Ok(HandlerOutcome::NoReply);
        };
        let reply = sanitize_reply(&generated);
        let reply_chars = self.post_reply(topic_id, mention.post_id, &reply).await?;
        tracing::info!(topic_id, post_id = mention.post_id, reply_chars, "posted reply");
        Ok(HandlerOutcome::Replied { reply_chars })
    }

    async fn post_reply(&self, topic_id: u64, post_id: u64, text: &str) -> Result<usize> {
        let text = if char_count(text) > self.settings.reply_max_chars {
            tracing::warn!(
                topic_id,
                post_id,
                reply_max_chars = self.settings.reply_max_chars,
                "truncating oversized reply"
            );
            truncate_with_ellipsis(text, self.settings.reply_max_chars)
        } else {
            text.to_string()
        };
        self.provider
            .reply(topic_id, post_id, &text)
            .await
            .with_context(|| format!("failed to post reply to topic {topic_id}"))?;
        Ok(char_count(&text))
    }
}
