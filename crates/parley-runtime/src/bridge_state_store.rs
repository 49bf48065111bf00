//! Checkpoint of notifications the bridge has already handled.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parley_core::write_text_atomic;
use serde::{Deserialize, Serialize};

pub const BRIDGE_STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MentionBridgeState {
    schema_version: u32,
    #[serde(default)]
    processed_notification_ids: VecDeque<String>,
    #[serde(default)]
    last_poll_at: Option<DateTime<Utc>>,
}

impl Default for MentionBridgeState {
    fn default() -> Self {
        Self {
            schema_version: BRIDGE_STATE_SCHEMA_VERSION,
            processed_notification_ids: VecDeque::new(),
            last_poll_at: None,
        }
    }
}

#[derive(Debug)]
pub struct BridgeStateStore {
    path: PathBuf,
    cap: usize,
    state: MentionBridgeState,
    processed_index: HashSet<String>,
}

impl BridgeStateStore {
    /// Loads the checkpoint at `path`. Unreadable JSON or an unknown schema
    /// starts from an empty state.
    pub fn load(path: PathBuf, cap: usize) -> Result<Self> {
        let mut state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read state file {}", path.display()))?;
            match serde_json::from_str::<MentionBridgeState>(&raw) {
                Ok(state) => state,
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        %error,
                        "failed to parse mention bridge state file (starting fresh)"
                    );
                    MentionBridgeState::default()
                }
            }
        } else {
            MentionBridgeState::default()
        };

        if state.schema_version != BRIDGE_STATE_SCHEMA_VERSION {
            tracing::warn!(
                expected = BRIDGE_STATE_SCHEMA_VERSION,
                found = state.schema_version,
                "unsupported mention bridge state schema (starting fresh)"
            );
            state = MentionBridgeState::default();
        }

        let cap = cap.max(1);
        while state.processed_notification_ids.len() > cap {
            state.processed_notification_ids.pop_front();
        }
        let processed_index = state
            .processed_notification_ids
            .iter()
            .cloned()
            .collect::<HashSet<_>>();
        Ok(Self {
            path,
            cap,
            state,
            processed_index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn contains(&self, notification_id: &str) -> bool {
        self.processed_index.contains(notification_id)
    }

    /// Records a handled notification, evicting the oldest beyond the cap.
    /// Returns `false` if it was already recorded.
    pub fn mark_processed(&mut self, notification_id: &str) -> bool {
        if self.processed_index.contains(notification_id) {
            return false;
        }
        self.state
            .processed_notification_ids
            .push_back(notification_id.to_string());
        self.processed_index.insert(notification_id.to_string());
        while self.state.processed_notification_ids.len() > self.cap {
            if let Some(evicted) = self.state.processed_notification_ids.pop_front() {
                self.processed_index.remove(&evicted);
            }
        }
        true
    }

    pub fn processed_ids(&self) -> impl Iterator<Item = &str> {
        self.state
            .processed_notification_ids
            .iter()
            .map(String::as_str)
    }

    pub fn record_poll(&mut self, at: DateTime<Utc>) {
        self.state.last_poll_at = Some(at);
    }

    pub fn last_poll_at(&self) -> Option<DateTime<Utc>> {
        self.state.last_poll_at
    }

    pub fn save(&self) -> Result<()> {
        let mut payload =
            serde_json::to_string_pretty(&self.state).context("failed to serialize state")?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write state file {}", self.path.display()))
    }
}
