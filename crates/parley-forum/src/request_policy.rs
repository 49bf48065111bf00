//! Retry and pacing rules for forum HTTP traffic.
//!
//! [`RetryPolicy`] decides whether a failed request is worth another attempt and
//! how long to back off. [`RequestPacer`] spaces consecutive requests out so the
//! bot stays under the forum's `Crawl-delay` even when several mention runs
//! share one client.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio::time::Instant;

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const MAX_CRAWL_DELAY_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    pub(crate) fn new(max_attempts: usize, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms.max(1)),
        }
    }

    pub(crate) fn allows_another(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }

    /// Rate limiting and server-side failures are transient. Everything else
    /// in the 4xx range is reported straight away.
    pub(crate) fn retries_status(&self, status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    pub(crate) fn retries_transport(&self, error: &reqwest::Error) -> bool {
        error.is_timeout() || error.is_connect() || error.is_request()
    }

    /// Doubles from the base delay per attempt. A server hint wins when it is
    /// longer than the base delay; both are capped at thirty seconds.
    pub(crate) fn backoff(&self, attempt: usize, server_hint: Option<Duration>) -> Duration {
        let delay = match server_hint {
            Some(hint) => hint.max(self.base_delay),
            None => {
                let doublings = attempt.saturating_sub(1).min(16) as u32;
                self.base_delay.saturating_mul(1_u32 << doublings)
            }
        };
        delay.min(MAX_BACKOFF)
    }
}

/// Reads `Retry-After` as either delta seconds or an HTTP date.
pub(crate) fn retry_after_hint(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    (at - now).to_std().ok()
}

/// Serializes the start of forum requests so two of them are never closer than
/// `min_interval`. Clones share one schedule.
#[derive(Debug, Clone)]
pub(crate) struct RequestPacer {
    min_interval: Duration,
    last_start: Arc<Mutex<Option<Instant>>>,
}

impl RequestPacer {
    pub(crate) fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_start: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub(crate) fn raise_min_interval(&mut self, floor: Duration) {
        self.min_interval = self.min_interval.max(floor);
    }

    pub(crate) async fn wait_turn(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last_start = self.last_start.lock().await;
        if let Some(previous) = *last_start {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_start = Some(Instant::now());
    }
}

/// Finds the `Crawl-delay` that applies to `user_agent` in a robots.txt body.
///
/// A group naming the agent takes precedence over the `*` group. Fractional
/// seconds are accepted.
pub(crate) fn crawl_delay_for(robots_txt: &str, user_agent: &str) -> Option<Duration> {
    let user_agent = user_agent.to_ascii_lowercase();
    let mut group_agents: Vec<String> = Vec::new();
    let mut group_has_rules = false;
    let mut named_delay = None;
    let mut wildcard_delay = None;

    for line in robots_txt.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let field = field.trim().to_ascii_lowercase();
        let value = value.trim();
        match field.as_str() {
            "user-agent" => {
                if group_has_rules {
                    group_agents.clear();
                    group_has_rules = false;
                }
                group_agents.push(value.to_ascii_lowercase());
            }
            "crawl-delay" => {
                group_has_rules = true;
                let Some(delay) = value
                    .parse::<f64>()
                    .ok()
                    .filter(|seconds| (0.0..=MAX_CRAWL_DELAY_SECS).contains(seconds))
                    .map(Duration::from_secs_f64)
                else {
                    continue;
                };
                for agent in group_agents.iter().filter(|agent| !agent.is_empty()) {
                    if agent == "*" {
                        wildcard_delay.get_or_insert(delay);
                    } else if user_agent.contains(agent.as_str()) {
                        named_delay.get_or_insert(delay);
                    }
                }
            }
            _ => group_has_rules = true,
        }
    }
    named_delay.or(wildcard_delay)
}
