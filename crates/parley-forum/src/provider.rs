use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// An unread notification telling the bot it was mentioned in a post.
pub struct MentionNotification {
    pub notification_id: String,
    pub topic_id: u64,
    pub post_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumUser {
    pub user_id: u64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A post as delivered by the forum. `content` is rendered HTML.
pub struct ForumPost {
    pub post_id: u64,
    pub topic_id: u64,
    pub author_id: u64,
    pub content: String,
}

#[async_trait]
/// Everything the bot needs from the hosting forum.
pub trait ForumProvider: Send + Sync {
    async fn unread_mentions(&self) -> Result<Vec<MentionNotification>>;

    async fn get_user(&self, user_id: u64) -> Result<ForumUser>;

    async fn get_post(&self, post_id: u64) -> Result<ForumPost>;

    /// Up to `limit` of the newest posts in the topic, oldest first.
    async fn recent_posts(&self, topic_id: u64, limit: usize) -> Result<Vec<ForumPost>>;

    async fn reply(&self, topic_id: u64, post_id: u64, text: &str) -> Result<()>;

    /// Error channel for failed runs. Must not fail itself.
    async fn report_error(&self, context: &str, error: &anyhow::Error);
}
