//! NodeBB implementation of the forum provider.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use parley_core::truncate_with_ellipsis;

use crate::provider::{ForumPost, ForumProvider, ForumUser, MentionNotification};
use crate::request_policy::{crawl_delay_for, retry_after_hint, RequestPacer, RetryPolicy};

pub const FORUM_USER_AGENT: &str = "parley-forum-bot";
const MENTION_NOTIFICATION_TYPE: &str = "mention";
const ERROR_BODY_MAX_CHARS: usize = 800;

#[derive(Debug, Clone)]
pub struct NodeBbConfig {
    pub base_url: String,
    pub api_token: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    /// Minimum gap between the starts of two forum requests. Zero disables pacing.
    pub min_request_interval_ms: u64,
}

#[derive(Clone)]
pub struct NodeBbClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    pacer: RequestPacer,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(value) => value.trim().parse().ok(),
        }
    }
}

fn required_id(raw: Option<&RawId>, field: &str) -> Result<u64> {
    raw.and_then(RawId::as_u64)
        .ok_or_else(|| anyhow!("nodebb payload has missing or non-numeric '{field}'"))
}

#[derive(Debug, Deserialize)]
struct RawNotificationPage {
    #[serde(default)]
    notifications: Vec<RawNotification>,
}

#[derive(Debug, Deserialize)]
struct RawNotification {
    #[serde(default)]
    nid: Value,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    pid: Option<RawId>,
    #[serde(default)]
    tid: Option<RawId>,
    #[serde(default)]
    read: bool,
}

#[derive(Debug, Deserialize)]
struct V3Envelope<T> {
    response: T,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    #[serde(default)]
    uid: Option<RawId>,
    username: String,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    #[serde(default)]
    pid: Option<RawId>,
    #[serde(default)]
    tid: Option<RawId>,
    #[serde(default)]
    uid: Option<RawId>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    timestamp: Option<u64>,
}

impl RawPost {
    fn into_forum_post(self, fallback_topic_id: Option<u64>) -> Result<ForumPost> {
        let post_id = required_id(self.pid.as_ref(), "pid")?;
        let topic_id = match self.tid.as_ref().and_then(RawId::as_u64) {
            Some(topic_id) => topic_id,
            None => fallback_topic_id
                .ok_or_else(|| anyhow!("nodebb post {post_id} has no 'tid'"))?,
        };
        Ok(ForumPost {
            post_id,
            topic_id,
            author_id: required_id(self.uid.as_ref(), "uid")?,
            content: self.content,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawTopic {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    postcount: Option<u64>,
    #[serde(default)]
    posts: Vec<RawPost>,
}

impl NodeBbClient {
    pub fn new(config: NodeBbConfig) -> Result<Self> {
        let token = config.api_token.trim();
        if token.is_empty() {
            bail!("nodebb api token is empty");
        }
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(FORUM_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .context("invalid nodebb authorization header")?,
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create nodebb http client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay_ms),
            pacer: RequestPacer::new(Duration::from_millis(config.min_request_interval_ms)),
        })
    }

    pub fn min_request_interval(&self) -> Duration {
        self.pacer.min_interval()
    }

    /// Raises the request interval to the forum's robots.txt `Crawl-delay`.
    /// A missing or unreadable robots.txt leaves the configured interval alone.
    pub async fn with_robots_crawl_delay(mut self) -> Self {
        let url = format!("{}/robots.txt", self.base_url);
        self.pacer.wait_turn().await;
        let body = match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => response.text().await.ok(),
            Ok(response) => {
                tracing::debug!(%url, status = response.status().as_u16(), "no robots.txt");
                None
            }
            Err(error) => {
                tracing::warn!(%url, %error, "failed to fetch robots.txt");
                None
            }
        };
        if let Some(delay) = body.and_then(|body| crawl_delay_for(&body, FORUM_USER_AGENT)) {
            self.pacer.raise_min_interval(delay);
            tracing::info!(
                crawl_delay_ms = delay.as_millis() as u64,
                min_request_interval_ms = self.pacer.min_interval().as_millis() as u64,
                "applying forum crawl delay"
            );
        }
        self
    }

    async fn fetch_topic_posts(&self, topic_id: u64) -> Result<Vec<RawPost>> {
        let first_page: RawTopic = self
            .request_json("fetch topic", || {
                self.http
                    .get(format!("{}/api/topic/{topic_id}", self.base_url))
            })
            .await?;
        let mut posts = first_page.posts;
        let loaded = u64::try_from(posts.len()).unwrap_or(u64::MAX);
        if let (Some(slug), Some(postcount)) = (first_page.slug.as_deref(), first_page.postcount) {
            if postcount > loaded {
                let last_page: RawTopic = self
                    .request_json("fetch topic tail", || {
                        self.http
                            .get(format!("{}/api/topic/{slug}/{postcount}", self.base_url))
                    })
                    .await?;
                posts.extend(last_page.posts);
            }
        }
        Ok(posts)
    }

    async fn request_json<T, F>(&self, operation: &str, mut build_request: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            self.pacer.wait_turn().await;
            match build_request().send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<T>()
                        .await
                        .with_context(|| format!("failed to decode nodebb {operation} response"));
                }
                Ok(response) => {
                    let status = response.status();
                    let hint = retry_after_hint(response.headers(), chrono::Utc::now());
                    let body = response.text().await.unwrap_or_default();
                    if self.retry.allows_another(attempt) && self.retry.retries_status(status) {
                        let delay = self.retry.backoff(attempt, hint);
                        tracing::warn!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            ?delay,
                            "retrying nodebb request"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    bail!(
                        "nodebb {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_with_ellipsis(&body, ERROR_BODY_MAX_CHARS)
                    );
                }
                Err(error) => {
                    if self.retry.allows_another(attempt) && self.retry.retries_transport(&error) {
                        let delay = self.retry.backoff(attempt, None);
                        tracing::warn!(operation, %error, attempt, "retrying nodebb request");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(error).with_context(|| format!("nodebb {operation} request failed"));
                }
            }
        }
    }
}

fn notification_id(raw: &Value) -> Option<String> {
    match raw {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Keeps the newest `limit` posts in chronological order, dropping duplicates
/// that appear on both the first and the last topic page.
fn newest_posts(raw_posts: Vec<RawPost>, topic_id: u64, limit: usize) -> Result<Vec<ForumPost>> {
    let mut seen = HashSet::new();
    let mut ordered = BTreeMap::new();
    for raw in raw_posts {
        let timestamp = raw.timestamp.unwrap_or_default();
        let post = raw.into_forum_post(Some(topic_id))?;
        if seen.insert(post.post_id) {
            ordered.insert((timestamp, post.post_id), post);
        }
    }
    let skip = ordered.len().saturating_sub(limit);
    Ok(ordered.into_values().skip(skip).collect())
}

#[async_trait]
impl ForumProvider for NodeBbClient {
    async fn unread_mentions(&self) -> Result<Vec<MentionNotification>> {
        let page: RawNotificationPage = self
            .request_json("list notifications", || {
                self.http.get(format!("{}/api/notifications", self.base_url))
            })
            .await?;
        let mentions = page
            .notifications
            .into_iter()
            .filter(|raw| !raw.read)
            .filter(|raw| raw.kind.as_deref() == Some(MENTION_NOTIFICATION_TYPE))
            .filter_map(|raw| {
                Some(MentionNotification {
                    notification_id: notification_id(&raw.nid)?,
                    topic_id: raw.tid.as_ref()?.as_u64()?,
                    post_id: raw.pid.as_ref()?.as_u64()?,
                })
            })
            .collect();
        Ok(mentions)
    }

    async fn get_user(&self, user_id: u64) -> Result<ForumUser> {
        let envelope: V3Envelope<RawUser> = self
            .request_json("fetch user", || {
                self.http
                    .get(format!("{}/api/v3/users/{user_id}", self.base_url))
            })
            .await?;
        let user = envelope.response;
        Ok(ForumUser {
            user_id: user.uid.as_ref().and_then(RawId::as_u64).unwrap_or(user_id),
            username: user.username,
        })
    }

    async fn get_post(&self, post_id: u64) -> Result<ForumPost> {
        let envelope: V3Envelope<RawPost> = self
            .request_json("fetch post", || {
                self.http
                    .get(format!("{}/api/v3/posts/{post_id}", self.base_url))
            })
            .await?;
        envelope.response.into_forum_post(None)
    }

    async fn recent_posts(&self, topic_id: u64, limit: usize) -> Result<Vec<ForumPost>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raw_posts = self.fetch_topic_posts(topic_id).await?;
        newest_posts(raw_posts, topic_id, limit)
    }

    async fn reply(&self, topic_id: u64, post_id: u64, text: &str) -> Result<()> {
        let payload = json!({ "content": text, "toPid": post_id });
        let _: Value = self
            .request_json("create reply", || {
                self.http
                    .post(format!("{}/api/v3/topics/{topic_id}", self.base_url))
                    .json(&payload)
            })
            .await?;
        Ok(())
    }

    async fn report_error(&self, context: &str, error: &anyhow::Error) {
        tracing::error!(context, error = %format!("{error:#}"), "forum bot run failed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use httpmock::prelude::*;
    use serde_json::json;

    use super::{NodeBbClient, NodeBbConfig};
    use crate::provider::{ForumProvider, MentionNotification};

    fn client_for(server: &MockServer) -> NodeBbClient {
        NodeBbClient::new(NodeBbConfig {
            base_url: server.base_url(),
            api_token: "forum-token".to_string(),
            request_timeout_ms: 3_000,
            retry_max_attempts: 2,
            retry_base_delay_ms: 1,
            min_request_interval_ms: 0,
        })
        .expect("client")
    }

    #[tokio::test]
    async fn functional_unread_mentions_filters_read_and_non_mention_notifications() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/notifications")
                .header("authorization", "Bearer forum-token");
            then.status(200).json_body(json!({
                "notifications": [
                    {"nid": "mention:post:11", "type": "mention", "pid": 11, "tid": "4", "read": false},
                    {"nid": "mention:post:9", "type": "mention", "pid": 9, "tid": 4, "read": true},
                    {"nid": "upvote:post:11", "type": "upvote", "pid": 11, "tid": 4, "read": false},
                    {"nid": "", "type": "mention", "pid": 12, "tid": 4, "read": false}
                ]
            }));
        });

        let mentions = client_for(&server).unread_mentions().await.expect("mentions");
        mock.assert();
        assert_eq!(
            mentions,
            vec![MentionNotification {
                notification_id: "mention:post:11".to_string(),
                topic_id: 4,
                post_id: 11,
            }]
        );
    }

    #[tokio::test]
    async fn functional_recent_posts_merges_first_and_last_pages_and_keeps_newest() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/topic/4");
            then.status(200).json_body(json!({
                "slug": "4/rust-talk",
                "postcount": 5,
                "posts": [
                    {"pid": 1, "tid": 4, "uid": 7, "content": "<p>one</p>", "timestamp": 100},
                    {"pid": 2, "tid": 4, "uid": 8, "content": "<p>two</p>", "timestamp": 200}
                ]
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/topic/4/rust-talk/5");
            then.status(200).json_body(json!({
                "slug": "4/rust-talk",
                "postcount": 5,
                "posts": [
                    {"pid": 2, "tid": 4, "uid": 8, "content": "<p>two</p>", "timestamp": 200},
                    {"pid": 5, "tid": 4, "uid": 7, "content": "<p>five</p>", "timestamp": 500},
                    {"pid": 4, "tid": 4, "uid": 9, "content": "<p>four</p>", "timestamp": 400}
                ]
            }));
        });

        let posts = client_for(&server).recent_posts(4, 3).await.expect("posts");
        let ids = posts.iter().map(|post| post.post_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![2, 4, 5]);
        assert_eq!(posts[0].author_id, 8);
    }

    #[tokio::test]
    async fn integration_get_post_and_user_unwrap_v3_envelopes() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v3/posts/11");
            then.status(200).json_body(json!({
                "status": {"code": "ok"},
                "response": {"pid": 11, "tid": 4, "uid": 7, "content": "<p>@parley hi</p>"}
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/v3/users/7");
            then.status(200).json_body(json!({
                "status": {"code": "ok"},
                "response": {"uid": 7, "username": "alice"}
            }));
        });

        let client = client_for(&server);
        let post = client.get_post(11).await.expect("post");
        assert_eq!((post.topic_id, post.author_id), (4, 7));
        let user = client.get_user(7).await.expect("user");
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn integration_reply_posts_content_to_topic_with_parent_post() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v3/topics/4")
                .json_body(json!({"content": "hello there", "toPid": 11}));
            then.status(200).json_body(json!({"status": {"code": "ok"}, "response": {}}));
        });

        client_for(&server)
            .reply(4, 11, "hello there")
            .await
            .expect("reply");
        mock.assert();
    }

    #[tokio::test]
    async fn regression_retryable_status_is_retried_then_reported() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/v3/users/3");
            then.status(502).body("bad gateway");
        });

        let error = client_for(&server).get_user(3).await.expect_err("fails");
        mock.assert_calls(2);
        assert!(error.to_string().contains("status 502"));
    }

    #[test]
    fn unit_new_rejects_blank_token() {
        let result = NodeBbClient::new(NodeBbConfig {
            base_url: "https://forum.example".to_string(),
            api_token: " ".to_string(),
            request_timeout_ms: 1_000,
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
            min_request_interval_ms: 0,
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn integration_robots_crawl_delay_paces_forum_requests() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/robots.txt");
            then.status(200)
                .body("User-agent: *\nDisallow: /admin\nCrawl-delay: 0.25\n");
        });
        let user_mock = server.mock(|when, then| {
            when.method(GET).path("/api/v3/users/7");
            then.status(200)
                .json_body(json!({"response": {"uid": 7, "username": "alice"}}));
        });

        let client = client_for(&server).with_robots_crawl_delay().await;
        assert_eq!(client.min_request_interval(), Duration::from_millis(250));

        let started = Instant::now();
        client.get_user(7).await.expect("first");
        client.get_user(7).await.expect("second");
        user_mock.assert_calls(2);
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn functional_missing_robots_keeps_configured_interval() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/robots.txt");
            then.status(404);
        });
        let client = NodeBbClient::new(NodeBbConfig {
            base_url: server.base_url(),
            api_token: "forum-token".to_string(),
            request_timeout_ms: 3_000,
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
            min_request_interval_ms: 25,
        })
        .expect("client")
        .with_robots_crawl_delay()
        .await;
        assert_eq!(client.min_request_interval(), Duration::from_millis(25));
    }
}
