use std::{collections::VecDeque, path::Path, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parley_ai::{ChatRequest, ChatResponse, LlmClient, MessageRole, ParleyAiError};
use parley_context::{ContextBudget, FileInstructionBackend, TopicInstructionStore};
use parley_forum::{ForumPost, ForumProvider, ForumUser, MentionNotification};
use parley_runtime::{
    GenerationSettings, HandlerOutcome, HandlerSettings, MentionBridge, MentionBridgeConfig,
    NotificationHandler, ResponseGenerator,
};
use tempfile::tempdir;
use tokio::sync::Mutex as AsyncMutex;

const TOPIC: u64 = 7;
const BOT_UID: u64 = 99;

struct ScriptedClient {
    responses: AsyncMutex<VecDeque<ChatResponse>>,
    requests: AsyncMutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    fn new(replies: &[&str]) -> Arc<Self> {
        let responses = replies
            .iter()
            .map(|reply| ChatResponse {
                content: Some(reply.to_string()),
                ..ChatResponse::default()
            })
            .collect();
        Arc::new(Self {
            responses: AsyncMutex::new(responses),
            requests: AsyncMutex::new(Vec::new()),
        })
    }

    async fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ParleyAiError> {
        self.requests.lock().await.push(request);
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ParleyAiError::InvalidResponse("scripted response queue exhausted".into()))
    }
}

/// Single-topic forum whose replies are appended to the thread like real posts.
struct ThreadForum {
    posts: AsyncMutex<Vec<ForumPost>>,
    mentions: AsyncMutex<Vec<MentionNotification>>,
    errors: AsyncMutex<Vec<String>>,
}

impl ThreadForum {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            posts: AsyncMutex::new(Vec::new()),
            mentions: AsyncMutex::new(Vec::new()),
            errors: AsyncMutex::new(Vec::new()),
        })
    }

    async fn post(&self, author_id: u64, html: &str) -> MentionNotification {
        let mut posts = self.posts.lock().await;
        let post_id = posts.len() as u64 + 1;
        posts.push(ForumPost {
            post_id,
            topic_id: TOPIC,
            author_id,
            content: html.to_string(),
        });
        let mention = MentionNotification {
            notification_id: format!("mention:post:{post_id}"),
            topic_id: TOPIC,
            post_id,
        };
        if html.contains("@parley") {
            self.mentions.lock().await.push(mention.clone());
        }
        mention
    }

    async fn bot_replies(&self) -> Vec<String> {
        self.posts
            .lock()
            .await
            .iter()
            .filter(|post| post.author_id == BOT_UID)
            .map(|post| post.content.clone())
            .collect()
    }
}

#[async_trait]
impl ForumProvider for ThreadForum {
    async fn unread_mentions(&self) -> Result<Vec<MentionNotification>> {
        Ok(self.mentions.lock().await.clone())
    }

    async fn get_user(&self, user_id: u64) -> Result<ForumUser> {
        let username = match user_id {
            1 => "alice",
            2 => "bob.the.builder",
            BOT_UID => "parley",
            _ => return Err(anyhow!("unknown user {user_id}")),
        };
        Ok(ForumUser {
            user_id,
            username: username.to_string(),
        })
    }

    async fn get_post(&self, post_id: u64) -> Result<ForumPost> {
        self.posts
            .lock()
            .await
            .iter()
            .find(|post| post.post_id == post_id)
            .cloned()
            .ok_or_else(|| anyhow!("post {post_id} not found"))
    }

    async fn recent_posts(&self, topic_id: u64, limit: usize) -> Result<Vec<ForumPost>> {
        let posts = self.posts.lock().await;
        let in_topic = posts
            .iter()
            .filter(|post| post.topic_id == topic_id)
            .cloned()
            .collect::<Vec<_>>();
        let skip = in_topic.len().saturating_sub(limit);
        Ok(in_topic.into_iter().skip(skip).collect())
    }

    async fn reply(&self, topic_id: u64, _post_id: u64, text: &str) -> Result<()> {
        let mut posts = self.posts.lock().await;
        let post_id = posts.len() as u64 + 1;
        posts.push(ForumPost {
            post_id,
            topic_id,
            author_id: BOT_UID,
            content: format!("<p>{text}</p>"),
        });
        Ok(())
    }

    async fn report_error(&self, context: &str, error: &anyhow::Error) {
        self.errors
            .lock()
            .await
            .push(format!("{context}: {error:#}"));
    }
}

fn build_handler(
    forum: Arc<ThreadForum>,
    client: Arc<ScriptedClient>,
    instruction_root: &Path,
) -> NotificationHandler {
    let instructions = TopicInstructionStore::new(
        Arc::new(FileInstructionBackend::new(instruction_root)),
        "You are parley, a helpful forum assistant.",
    );
    let generator = ResponseGenerator::new(
        client,
        GenerationSettings {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            presence_penalty: 0.0,
            max_tokens: None,
            completion_timeout: Duration::from_secs(5),
        },
    );
    NotificationHandler::new(
        forum,
        instructions,
        generator,
        "parley",
        HandlerSettings {
            post_limit: 100,
            budget: ContextBudget::new(25_000, 5),
            reply_max_chars: 32_000,
        },
    )
}

#[tokio::test]
async fn integration_bridge_applies_topic_instruction_and_replies_in_thread() {
    let temp = tempdir().expect("tempdir");
    let forum = ThreadForum::new();
    let client = ScriptedClient::new(&["Rust is a systems language. <|endoftext|>", "Yes, @bob."]);
    forum
        .post(1, "<p>#system_message(Be terse.)</p><p>What is Rust?</p>")
        .await;
    forum.post(2, "<p>@parley explain please</p>").await;

    let handler = build_handler(forum.clone(), client.clone(), &temp.path().join("instructions"));
    let mut bridge = MentionBridge::new(
        MentionBridgeConfig {
            state_path: temp.path().join("state.json"),
            poll_interval: Duration::from_millis(10),
            poll_once: true,
            processed_notification_cap: 100,
            max_concurrent_runs: 1,
        },
        forum.clone(),
        handler,
    )
    .expect("bridge");

    let first = bridge.poll_cycle().await.expect("first poll");
    assert_eq!((first.started, first.completed), (1, 1));
    assert_eq!(
        std::fs::read_to_string(temp.path().join("instructions/topic-7.txt")).expect("override"),
        "Be terse."
    );

    forum.post(1, "<p>@parley is it fast?</p>").await;
    let second = bridge.poll_cycle().await.expect("second poll");
    assert_eq!(second.skipped_duplicates, 1);
    assert_eq!(second.completed, 1);

    let requests = client.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages[0].role, MessageRole::System);
    assert_eq!(requests[0].messages[0].content, "Be terse.");
    assert_eq!(requests[0].messages[1].content, "What is Rust?");
    assert_eq!(requests[0].messages[2].name.as_deref(), Some("bobthebuilder"));

    let follow_up = &requests[1].messages;
    assert_eq!(follow_up[3].role, MessageRole::Assistant);
    assert_eq!(follow_up[3].content, "Rust is a systems language.");
    assert_eq!(follow_up[4].content, "@parley is it fast?");

    assert_eq!(
        forum.bot_replies().await,
        vec![
            "<p>Rust is a systems language.</p>".to_string(),
            "<p>Yes, @\u{200B}bob.</p>".to_string(),
        ]
    );
}

#[tokio::test]
async fn integration_show_instruction_reports_override_without_completion() {
    let temp = tempdir().expect("tempdir");
    let forum = ThreadForum::new();
    let client = ScriptedClient::new(&["d'accord"]);
    let handler = build_handler(forum.clone(), client.clone(), temp.path());

    let default_mention = forum.post(1, "<p>@parley #show_system_message</p>").await;
    assert_eq!(
        handler.handle(&default_mention).await.expect("show default"),
        HandlerOutcome::ShowedInstruction
    );

    forum.post(1, "<p>#system_message(Answer in French.)</p>").await;
    forum.post(2, "<p>@parley bonjour</p>").await;
    let seeding_mention = forum.post(2, "<p>@parley merci</p>").await;
    handler.handle(&seeding_mention).await.expect("seed override");

    let show_again = forum.post(1, "<p>@parley #show_system_message</p>").await;
    handler.handle(&show_again).await.expect("show override");

    let replies = forum.bot_replies().await;
    assert_eq!(replies[0], "<p>> You are parley, a helpful forum assistant.</p>");
    assert_eq!(replies.last().map(String::as_str), Some("<p>> Answer in French.</p>"));
    assert_eq!(client.requests().await.len(), 1);
}

#[tokio::test]
async fn integration_large_thread_is_budgeted_to_five_newest_posts() {
    let temp = tempdir().expect("tempdir");
    let forum = ThreadForum::new();
    let client = ScriptedClient::new(&["ok"]);
    for index in 0..5 {
        let body = char::from(b'a' + index).to_string().repeat(10_000);
        forum.post(1, &format!("<p>{body}</p>")).await;
    }
    let tail = format!("@parley {}", "f".repeat(10_000 - 8));
    let mention = forum.post(2, &format!("<p>{tail}</p>")).await;

    build_handler(forum.clone(), client.clone(), temp.path())
        .handle(&mention)
        .await
        .expect("handle");

    let requests = client.requests().await;
    let history = &requests[0].messages[1..];
    assert_eq!(history.len(), 5);
    assert!(history[0].content.starts_with('b'));
    assert_eq!(history[4].content, tail);
}

#[tokio::test]
async fn integration_clear_context_drops_earlier_posts_but_keeps_its_own() {
    let temp = tempdir().expect("tempdir");
    let forum = ThreadForum::new();
    let client = ScriptedClient::new(&["fresh"]);
    forum.post(1, "<p>old topic chatter</p>").await;
    forum
        .post(2, "<p>new subject</p><p>#clear_context</p>")
        .await;
    let mention = forum.post(1, "<p>@parley thoughts?</p>").await;

    build_handler(forum.clone(), client.clone(), temp.path())
        .handle(&mention)
        .await
        .expect("handle");

    let requests = client.requests().await;
    let contents = requests[0].messages[1..]
        .iter()
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>();
    assert_eq!(contents, vec!["new subject", "@parley thoughts?"]);
}

#[tokio::test]
async fn regression_completion_failure_is_reported_and_nothing_is_posted() {
    let temp = tempdir().expect("tempdir");
    let forum = ThreadForum::new();
    let client = ScriptedClient::new(&[]);
    let mention = forum.post(1, "<p>@parley hello?</p>").await;

    let error = build_handler(forum.clone(), client, temp.path())
        .handle(&mention)
        .await
        .expect_err("completion fails");

    assert!(format!("{error:#}").contains("scripted response queue exhausted"));
    assert!(forum.bot_replies().await.is_empty());
    let errors = forum.errors.lock().await;
    assert_eq!(errors.len(), 1);
}
