use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shared::models::Channel;

use crate::channels::AdapterRegistry;
use crate::core::Config;
use crate::dispatch::{DepotCache, DispatchGateway, HttpDeliveryProvider, RateLimiter};
use crate::reconcile::WebhookReconciler;
use crate::services::{BroadcastNotifier, NotificationEmitter};
use crate::store::OrderStore;
use crate::sync::{ChannelSyncEngine, SyncScheduler};

/// Shared server state, one instance per process
///
/// Cheap to clone: everything inside is an `Arc` or already a handle.
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub store: OrderStore,
    /// Registered sales channels, keyed by channel id
    pub channels: Arc<DashMap<String, Channel>>,
    pub registry: AdapterRegistry,
    pub notifier: Arc<BroadcastNotifier>,
    pub sync_engine: Arc<ChannelSyncEngine>,
    pub gateway: Arc<DispatchGateway>,
    pub reconciler: Arc<WebhookReconciler>,
    shutdown: CancellationToken,
}

impl ServerState {
    /// Initialize all services from configuration
    ///
    /// Order matters: work dir first, then the store, then everything that
    /// holds a store handle.
    pub async fn initialize(config: &Config) -> anyhow::Result<Self> {
        config.ensure_work_dir_structure()?;

        let db_path = config.database_dir().join("orders.redb");
        let store = OrderStore::open(&db_path)?;
        info!(path = %db_path.display(), "Order store opened");

        let notifier = Arc::new(BroadcastNotifier::new());
        let emitter: Arc<dyn NotificationEmitter> = notifier.clone();

        let registry = AdapterRegistry::with_defaults();
        let sync_engine = Arc::new(ChannelSyncEngine::new(
            store.clone(),
            registry.clone(),
            emitter.clone(),
            Duration::from_secs(config.sync_deadline_secs),
        ));

        let provider = Arc::new(HttpDeliveryProvider::new(
            config.provider_base_url.clone(),
            config.provider_api_key.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            config.provider_min_interval_ms,
        )));
        let depot_cache = DepotCache::new(Duration::from_secs(config.depot_cache_ttl_secs));
        let gateway = Arc::new(DispatchGateway::new(
            store.clone(),
            provider,
            rate_limiter,
            depot_cache,
            emitter.clone(),
        ));

        let reconciler = Arc::new(WebhookReconciler::new(store.clone(), emitter));

        let channels = Arc::new(DashMap::new());
        Self::load_channel_roster(config, &channels);

        let state = Self {
            config: config.clone(),
            store,
            channels,
            registry,
            notifier,
            sync_engine,
            gateway,
            reconciler,
            shutdown: CancellationToken::new(),
        };

        // Provision webhooks for roster channels; collected first so no map
        // shard lock is held across an await
        let roster: Vec<Channel> = state
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for channel in &roster {
            state.register_channel_webhook(channel).await;
        }

        Ok(state)
    }

    /// Load the channel roster from `work_dir/channels.json` if present
    ///
    /// A missing file is normal (channels can be registered at runtime); a
    /// malformed one is logged and skipped so the server still boots.
    fn load_channel_roster(config: &Config, channels: &DashMap<String, Channel>) {
        let path = config.channels_file();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return,
        };
        match serde_json::from_str::<Vec<Channel>>(&raw) {
            Ok(roster) => {
                for channel in roster {
                    channels.insert(channel.id.clone(), channel);
                }
                info!(count = channels.len(), path = %path.display(), "Loaded channel roster");
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Ignoring malformed channel roster");
            }
        }
    }

    /// Spawn long-running background tasks
    ///
    /// Must be called once after [`initialize()`].
    pub fn start_background_tasks(&self) {
        let scheduler = SyncScheduler::new(
            self.sync_engine.clone(),
            self.channels.clone(),
            Duration::from_secs(self.config.sync_interval_secs),
            self.shutdown.child_token(),
        );
        tokio::spawn(scheduler.run());
    }

    /// Register or replace a sales channel at runtime
    ///
    /// Webhook provisioning with the upstream platform is best-effort:
    /// registration never fails on it.
    pub async fn register_channel(&self, channel: Channel) {
        info!(channel_id = %channel.id, channel_type = %channel.channel_type.as_str(), "Channel registered");
        self.channels.insert(channel.id.clone(), channel.clone());
        self.register_channel_webhook(&channel).await;
    }

    async fn register_channel_webhook(&self, channel: &Channel) {
        let Some(adapter) = self.registry.get(channel.channel_type) else {
            return;
        };
        match adapter
            .register_webhook(channel, &self.config.webhook_callback_url)
            .await
        {
            Ok(()) => {
                debug!(channel_id = %channel.id, "Order webhook registered with platform");
            }
            Err(err) => {
                warn!(channel_id = %channel.id, error = %err, "Webhook registration failed, continuing");
            }
        }
    }

    pub fn remove_channel(&self, channel_id: &str) -> bool {
        self.channels.remove(channel_id).is_some()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal every background task to stop
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
