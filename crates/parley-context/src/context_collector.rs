//! Builds the role-tagged transcript for a topic.
//!
//! Collection runs in two phases. Posts are first resolved against the forum
//! (author lookup, HTML normalization) into [`ThreadPost`]s; [`fold_thread`]
//! then walks them in order and produces the messages plus the instruction
//! writes requested by directives, which the collector applies afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parley_ai::Message;
use parley_forum::{normalize_post_html, ForumProvider};

use crate::author_name::sanitize_author_name;
use crate::directive_parser::{split_prose_and_directives, Directive};
use crate::instruction_store::TopicInstructionStore;

#[derive(Debug, Clone, PartialEq, Eq)]
/// A post with its author resolved and its content already normalized to text.
pub struct ThreadPost {
    pub post_id: u64,
    pub author_name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionWrite {
    pub post_id: u64,
    pub instruction: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedContext {
    pub messages: Vec<Message>,
    pub instruction_writes: Vec<InstructionWrite>,
}

/// Folds chronologically ordered posts into a transcript.
///
/// `#clear_context` on a post discards everything collected before that post
/// but keeps the post's own prose.
pub fn fold_thread(posts: &[ThreadPost], bot_username: &str) -> CollectedContext {
    let bot_name = sanitize_author_name(bot_username.trim());
    let mut collected = CollectedContext::default();
    for post in posts {
        let split = split_prose_and_directives(&post.text);
        let mut post_start = collected.messages.len();
        if split.has_prose() {
            let name = sanitize_author_name(&post.author_name);
            let message = if name.trim().eq_ignore_ascii_case(&bot_name) {
                Message::assistant(split.prose.trim())
            } else {
                Message::user(split.prose.trim())
            };
            collected.messages.push(message.with_name(name));
        }
        for directive in split.parsed_directives() {
            match directive {
                Directive::ClearContext => {
                    collected.messages.drain(..post_start);
                    post_start = 0;
                }
                Directive::SetInstruction(instruction) => {
                    collected.instruction_writes.push(InstructionWrite {
                        post_id: post.post_id,
                        instruction,
                    });
                }
                Directive::ShowInstruction | Directive::Unrecognized => {}
            }
        }
    }
    collected
}

#[derive(Clone)]
pub struct ContextCollector {
    provider: Arc<dyn ForumProvider>,
    instructions: TopicInstructionStore,
    bot_username: String,
}

impl ContextCollector {
    pub fn new(
        provider: Arc<dyn ForumProvider>,
        instructions: TopicInstructionStore,
        bot_username: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            instructions,
            bot_username: bot_username.into(),
        }
    }

    /// Collects up to `post_limit` recent posts of the topic into messages,
    /// applying any instruction overrides found along the way.
    pub async fn collect(&self, topic_id: u64, post_limit: usize) -> Result<Vec<Message>> {
        let posts = self
            .provider
            .recent_posts(topic_id, post_limit)
            .await
            .with_context(|| format!("failed to load recent posts for topic {topic_id}"))?;

        let mut usernames: HashMap<u64, String> = HashMap::new();
        let mut thread = Vec::with_capacity(posts.len());
        for post in posts {
            let author_name = match usernames.get(&post.author_id) {
                Some(name) => name.clone(),
                None => {
                    let user = self
                        .provider
                        .get_user(post.author_id)
                        .await
                        .with_context(|| format!("failed to resolve author {}", post.author_id))?;
                    usernames.insert(post.author_id, user.username.clone());
                    user.username
                }
            };
            thread.push(ThreadPost {
                post_id: post.post_id,
                author_name,
                text: normalize_post_html(&post.content),
            });
        }

        let collected = fold_thread(&thread, &self.bot_username);
        for write in &collected.instruction_writes {
            self.instructions.set(topic_id, &write.instruction)?;
            tracing::info!(
                topic_id,
                post_id = write.post_id,
                "topic instruction override updated from directive"
            );
        }
        tracing::debug!(
            topic_id,
            posts = thread.len(),
            messages = collected.messages.len(),
            instruction_writes = collected.instruction_writes.len(),
            "collected conversation context"
        );
        Ok(collected.messages)
    }
}
