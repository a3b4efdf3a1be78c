use std::path::PathBuf;

/// Server configuration
///
/// Every knob can be overridden through an environment variable:
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | WORK_DIR | /var/lib/dispatch-engine | Working directory (database, logs) |
/// | ENVIRONMENT | development | development \| staging \| production |
/// | DELIVERY_API_URL | http://localhost:4000 | Delivery provider base URL |
/// | DELIVERY_API_KEY | (empty) | Delivery provider API key |
/// | PROVIDER_MIN_INTERVAL_MS | 250 | Min spacing between provider calls |
/// | SYNC_INTERVAL_SECS | 300 | Channel sync scheduler period |
/// | SYNC_DEADLINE_SECS | 120 | Per-channel sync run deadline |
/// | DEPOT_CACHE_TTL_SECS | 900 | Depot id cache TTL |
/// | WEBHOOK_CALLBACK_URL | http://localhost:3000/webhooks/orders | Callback registered with channel platforms |
#[derive(Debug, Clone)]
pub struct Config {
    /// Working directory for the database and log files
    pub work_dir: String,
    /// Runtime environment: development | staging | production
    pub environment: String,
    /// Delivery provider base URL
    pub provider_base_url: String,
    /// Delivery provider API key
    pub provider_api_key: String,
    /// Minimum spacing between outbound provider calls (milliseconds)
    pub provider_min_interval_ms: u64,
    /// How often the scheduler runs a full sync round (seconds)
    pub sync_interval_secs: u64,
    /// Wall-clock deadline for one channel's sync run (seconds)
    pub sync_deadline_secs: u64,
    /// How long a fetched depot id stays valid (seconds)
    pub depot_cache_ttl_secs: u64,
    /// Public callback URL registered with channel platforms for order webhooks
    pub webhook_callback_url: String,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR")
                .unwrap_or_else(|_| "/var/lib/dispatch-engine".into()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            provider_base_url: std::env::var("DELIVERY_API_URL")
                .unwrap_or_else(|_| "http://localhost:4000".into()),
            provider_api_key: std::env::var("DELIVERY_API_KEY").unwrap_or_default(),
            provider_min_interval_ms: env_parsed("PROVIDER_MIN_INTERVAL_MS", 250),
            sync_interval_secs: env_parsed("SYNC_INTERVAL_SECS", 300),
            sync_deadline_secs: env_parsed("SYNC_DEADLINE_SECS", 120),
            depot_cache_ttl_secs: env_parsed("DEPOT_CACHE_TTL_SECS", 900),
            webhook_callback_url: std::env::var("WEBHOOK_CALLBACK_URL")
                .unwrap_or_else(|_| "http://localhost:3000/webhooks/orders".into()),
        }
    }

    /// Override the working directory, usually for tests
    pub fn with_work_dir(work_dir: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config
    }

    pub fn database_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("database")
    }

    pub fn logs_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("logs")
    }

    /// Optional channel roster file loaded at startup
    pub fn channels_file(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("channels.json")
    }

    pub fn ensure_work_dir_structure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.database_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        let config = Config::with_work_dir("/tmp/dispatch-test");
        assert_eq!(config.work_dir, "/tmp/dispatch-test");
        assert_eq!(
            config.database_dir(),
            PathBuf::from("/tmp/dispatch-test/database")
        );
        assert!(config.sync_interval_secs > 0);
        assert!(config.sync_deadline_secs > 0);
    }
}
