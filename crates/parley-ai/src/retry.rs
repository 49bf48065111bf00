use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) const BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_SHIFT: usize = 6;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);
static JITTER_SEED: AtomicU64 = AtomicU64::new(1);

pub(crate) fn should_retry_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 425 | 429) || status >= 500
}

pub(crate) fn backoff_ms(attempt: usize) -> u64 {
    BASE_BACKOFF_MS.saturating_mul(1_u64 << attempt.min(MAX_BACKOFF_SHIFT))
}

/// Backoff for `attempt`, optionally spread over `[50%, 100%]` of the base delay.
pub(crate) fn jittered_backoff_ms(attempt: usize, jitter: bool) -> u64 {
    let base = backoff_ms(attempt);
    if !jitter || base < 2 {
        return base;
    }
    let floor = base / 2;
    let span = base - floor;
    let seed = JITTER_SEED.fetch_add(1, Ordering::Relaxed);
    let mixed = seed
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .rotate_left(23)
        ^ 0x5851_F42D_4C95_7F2D;
    floor + mixed % (span + 1)
}

/// Reads `Retry-After` as either delta-seconds or an HTTP date.
pub(crate) fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1_000));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at
        .signed_duration_since(Utc::now())
        .num_milliseconds();
    Some(u64::try_from(delay_ms).unwrap_or(0))
}

pub(crate) fn retry_delay_ms(attempt: usize, jitter: bool, retry_after_ms: Option<u64>) -> u64 {
    let backoff = jittered_backoff_ms(attempt, jitter);
    retry_after_ms.map_or(backoff, |hint| backoff.max(hint))
}

/// A zero budget means "no overall limit".
pub(crate) fn retry_budget_allows(elapsed_ms: u64, delay_ms: u64, budget_ms: u64) -> bool {
    budget_ms == 0 || elapsed_ms.saturating_add(delay_ms) <= budget_ms
}

pub(crate) fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

pub(crate) fn new_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let sequence = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("parley-{millis}-{sequence}")
}
