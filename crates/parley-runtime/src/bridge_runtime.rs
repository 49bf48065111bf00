//! Polling bridge that discovers mentions and runs one handler task per mention.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parley_forum::ForumProvider;
use tokio::sync::Semaphore;

use crate::bridge_state_store::BridgeStateStore;
use crate::notification_handler::NotificationHandler;

#[derive(Debug, Clone)]
pub struct MentionBridgeConfig {
    pub state_path: PathBuf,
    pub poll_interval: Duration,
    pub poll_once: bool,
    pub processed_notification_cap: usize,
    pub max_concurrent_runs: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollCycleReport {
    pub discovered: usize,
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped_duplicates: usize,
}

/// Runs the mention bridge until Ctrl-C, or for a single cycle with `poll_once`.
pub async fn run_mention_bridge(
    config: MentionBridgeConfig,
    provider: Arc<dyn ForumProvider>,
    handler: NotificationHandler,
) -> Result<()> {
    let mut bridge = MentionBridge::new(config, provider, handler)?;
    bridge.run().await
}

pub struct MentionBridge {
    config: MentionBridgeConfig,
    provider: Arc<dyn ForumProvider>,
    handler: Arc<NotificationHandler>,
    state_store: BridgeStateStore,
    run_slots: Arc<Semaphore>,
}

impl MentionBridge {
    pub fn new(
        config: MentionBridgeConfig,
        provider: Arc<dyn ForumProvider>,
        handler: NotificationHandler,
    ) -> Result<Self> {
        let state_store = BridgeStateStore::load(
            config.state_path.clone(),
            config.processed_notification_cap,
        )?;
        let run_slots = Arc::new(Semaphore::new(config.max_concurrent_runs.max(1)));
        Ok(Self {
            config,
            provider,
            handler: Arc::new(handler),
            state_store,
            run_slots,
        })
    }

    pub fn state_store(&self) -> &BridgeStateStore {
        &self.state_store
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut failure_streak = 0_usize;
        loop {
            match self.poll_cycle().await {
                Ok(report) => {
                    failure_streak = 0;
                    tracing::info!(
                        discovered = report.discovered,
                        started = report.started,
                        completed = report.completed,
                        failed = report.failed,
                        skipped_duplicates = report.skipped_duplicates,
                        "mention bridge poll"
                    );
                    if self.config.poll_once {
                        return Ok(());
                    }
                }
                Err(error) => {
                    failure_streak = failure_streak.saturating_add(1);
                    tracing::warn!(
                        failure_streak,
                        error = %format!("{error:#}"),
                        "mention bridge poll error"
                    );
                    if self.config.poll_once {
                        return Err(error);
                    }
                }
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("mention bridge shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// One poll: fetch unread mentions, run every unseen one, wait for all of
    /// them, then checkpoint. Failed runs are checkpointed too.
    pub async fn poll_cycle(&mut self) -> Result<PollCycleReport> {
        let mut report = PollCycleReport::default();
        let mentions = self
            .provider
            .unread_mentions()
            .await
            .context("failed to list unread mentions")?;
        report.discovered = mentions.len();

        let mut batch_ids = HashSet::new();
        let mut runs = Vec::new();
        for mention in mentions {
            if self.state_store.contains(&mention.notification_id)
                || !batch_ids.insert(mention.notification_id.clone())
            {
                report.skipped_duplicates = report.skipped_duplicates.saturating_add(1);
                continue;
            }
            let handler = self.handler.clone();
            let run_slots = self.run_slots.clone();
            let notification_id = mention.notification_id.clone();
            let handle = tokio::spawn(async move {
                let _slot = run_slots
                    .acquire_owned()
                    .await
                    .context("mention run limiter closed")?;
                handler.handle(&mention).await
            });
            report.started = report.started.saturating_add(1);
            runs.push((notification_id, handle));
        }

        for (notification_id, handle) in runs {
            match handle.await {
                Ok(Ok(outcome)) => {
                    report.completed = report.completed.saturating_add(1);
                    tracing::debug!(notification_id = %notification_id, ?outcome, "mention run completed");
                }
                Ok(Err(error)) => {
                    report.failed = report.failed.saturating_add(1);
                    tracing::warn!(
                        notification_id = %notification_id,
                        error = %format!("{error:#}"),
                        "mention run failed"
                    );
                }
                Err(error) => {
                    report.failed = report.failed.saturating_add(1);
                    tracing::warn!(notification_id = %notification_id, %error, "mention run task aborted");
                }
            }
            self.state_store.mark_processed(&notification_id);
        }

        self.state_store.record_poll(chrono::Utc::now());
        self.state_store.save()?;
        Ok(report)
    }
}
