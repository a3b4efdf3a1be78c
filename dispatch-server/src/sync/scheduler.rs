//! SyncScheduler — background worker that periodically syncs all pull channels
//!
//! One worker for the whole server: ticks on a fixed interval, runs each
//! enabled pull channel in turn, and advances that channel's high-water mark
//! only after a fully successful run. Per-channel failures are logged and the
//! rest of the round continues.

use crate::sync::ChannelSyncEngine;
use dashmap::DashMap;
use shared::models::{Channel, SyncOutcome};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct SyncScheduler {
    engine: Arc<ChannelSyncEngine>,
    channels: Arc<DashMap<String, Channel>>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl SyncScheduler {
    pub fn new(
        engine: Arc<ChannelSyncEngine>,
        channels: Arc<DashMap<String, Channel>>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            channels,
            interval,
            shutdown,
        }
    }

    /// Run the scheduler until shutdown
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "SyncScheduler started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // skip immediate tick

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("SyncScheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sync_round().await;
                }
            }
        }

        info!("SyncScheduler stopped");
    }

    /// One pass over every enabled pull channel
    async fn sync_round(&self) {
        let targets: Vec<Channel> = self
            .channels
            .iter()
            .filter(|entry| entry.enabled && entry.channel_type.supports_pull())
            .map(|entry| entry.clone())
            .collect();

        if targets.is_empty() {
            return;
        }

        for channel in targets {
            let round_started = chrono::Utc::now();
            match self.engine.sync_channel(&channel).await {
                Ok(report) => {
                    // Partial runs keep the old mark so missed orders are
                    // retried next round
                    if report.outcome == SyncOutcome::Success
                        && let Some(mut entry) = self.channels.get_mut(&channel.id)
                    {
                        entry.last_synced_at = Some(round_started);
                    }
                }
                Err(err) => {
                    error!(channel_id = %channel.id, error = %err, "Channel sync failed");
                }
            }
        }
    }
}
