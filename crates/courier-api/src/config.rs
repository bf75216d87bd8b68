//! Layered service configuration.

use std::{net::SocketAddr, path::Path, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use courier_delivery::{ClientConfig, DeliveryConfig, RetryPolicy, SsrfPolicy};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "COURIER_";

/// Complete service configuration.
///
/// Loaded in priority order:
/// 1. Environment variables prefixed with `COURIER_` (highest priority)
/// 2. Configuration file (`config.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Every field has a default, so an empty environment yields a runnable
/// service backed by `requests.db` in the working directory.
///
/// # Example
///
/// ```no_run
/// use courier_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
/// println!("Listening on {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Server
    /// Bind address.
    ///
    /// Environment variable: `COURIER_HOST`
    pub host: String,
    /// Bind port.
    ///
    /// Environment variable: `COURIER_PORT`
    pub port: u16,
    /// Per-request timeout for the HTTP API in seconds.
    ///
    /// Environment variable: `COURIER_REQUEST_TIMEOUT_SECS`
    pub request_timeout_secs: u64,

    // Database
    /// SQLite connection URL.
    ///
    /// Environment variable: `COURIER_DATABASE_URL`
    pub database_url: String,
    /// Maximum connections in the SQLite pool.
    ///
    /// Environment variable: `COURIER_DATABASE_MAX_CONNECTIONS`
    pub database_max_connections: u32,

    // Worker pool
    /// Number of concurrent workers.
    ///
    /// Environment variable: `COURIER_WORKER_COUNT`
    pub worker_count: usize,
    /// Maximum queued jobs before `/async` answers 503.
    ///
    /// Environment variable: `COURIER_QUEUE_CAPACITY`
    pub queue_capacity: usize,

    // Callback delivery
    /// Per-attempt callback timeout in milliseconds.
    ///
    /// Environment variable: `COURIER_CALLBACK_TIMEOUT_MS`
    pub callback_timeout_ms: u64,
    /// Retries after the first callback attempt.
    ///
    /// Environment variable: `COURIER_CALLBACK_MAX_RETRIES`
    pub callback_max_retries: u32,
    /// Backoff base in milliseconds.
    ///
    /// Environment variable: `COURIER_CALLBACK_RETRY_BASE_DELAY_MS`
    pub callback_retry_base_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    ///
    /// Environment variable: `COURIER_CALLBACK_RETRY_MAX_DELAY_MS`
    pub callback_retry_max_delay_ms: u64,
    /// Maximum concurrent outbound callback requests.
    ///
    /// Environment variable: `COURIER_CALLBACK_MAX_CONNECTIONS`
    pub callback_max_connections: usize,
    /// Reject callbacks to private, loopback, and reserved addresses.
    ///
    /// Environment variable: `COURIER_CALLBACK_BLOCK_PRIVATE_IPS`
    pub callback_block_private_ips: bool,
    /// URL schemes callbacks may use.
    ///
    /// Environment variable: `COURIER_CALLBACK_ALLOWED_SCHEMES`
    pub callback_allowed_schemes: Vec<String>,

    // Retention
    /// Age after which request records are deleted, in hours.
    ///
    /// Environment variable: `COURIER_REQUEST_RETENTION_HOURS`
    pub request_retention_hours: u64,
    /// Interval between retention sweeps in seconds.
    ///
    /// Environment variable: `COURIER_RETENTION_SWEEP_INTERVAL_SECS`
    pub retention_sweep_interval_secs: u64,

    // Lifecycle
    /// Time allowed for workers to finish on shutdown, in seconds.
    ///
    /// Environment variable: `COURIER_SHUTDOWN_GRACE_SECS`
    pub shutdown_grace_secs: u64,

    // Logging
    /// Log filter used when `RUST_LOG` is unset.
    ///
    /// Environment variable: `COURIER_RUST_LOG`
    pub rust_log: String,
}

impl Config {
    /// Loads defaults, then `config.toml`, then `COURIER_*` variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the merged values
    /// fail validation.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Like [`Config::load`] but reads the TOML layer from `path`.
    ///
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the merged values
    /// fail validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Worker pool configuration.
    pub fn to_delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            worker_count: self.worker_count,
            queue_capacity: self.queue_capacity,
            shutdown_timeout: self.shutdown_grace(),
            client_config: self.to_client_config(),
            retry_policy: self.to_retry_policy(),
            ssrf_policy: self.to_ssrf_policy(),
            ..DeliveryConfig::default()
        }
    }

    /// Callback HTTP client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_millis(self.callback_timeout_ms),
            max_connections: self.callback_max_connections,
            ..ClientConfig::default()
        }
    }

    /// Callback retry schedule.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.callback_max_retries,
            base_delay: Duration::from_millis(self.callback_retry_base_delay_ms),
            max_delay: Duration::from_millis(self.callback_retry_max_delay_ms),
        }
    }

    /// Callback URL restrictions. Schemes are compared lowercase.
    pub fn to_ssrf_policy(&self) -> SsrfPolicy {
        SsrfPolicy {
            allowed_schemes: self
                .callback_allowed_schemes
                .iter()
                .map(|scheme| scheme.trim().to_ascii_lowercase())
                .collect(),
            block_private_ips: self.callback_block_private_ips,
        }
    }

    /// Socket address built from `host` and `port`.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not an IP address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Maximum age of a request record.
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.request_retention_hours.saturating_mul(3600))
    }

    /// Interval between retention sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_interval_secs)
    }

    /// Shutdown grace period for workers.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database_max_connections must be greater than 0");
        }

        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be greater than 0");
        }

        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }

        if self.callback_timeout_ms == 0 {
            anyhow::bail!("callback_timeout_ms must be greater than 0");
        }

        if self.callback_max_connections == 0 {
            anyhow::bail!("callback_max_connections must be greater than 0");
        }

        if self.callback_retry_base_delay_ms > self.callback_retry_max_delay_ms {
            anyhow::bail!("callback_retry_base_delay_ms cannot exceed callback_retry_max_delay_ms");
        }

        if self.callback_allowed_schemes.iter().all(|scheme| scheme.trim().is_empty()) {
            anyhow::bail!("callback_allowed_schemes must name at least one scheme");
        }

        if self.retention_sweep_interval_secs == 0 {
            anyhow::bail!("retention_sweep_interval_secs must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_secs: 30,
            database_url: "sqlite://requests.db?mode=rwc".to_string(),
            database_max_connections: 5,
            worker_count: courier_delivery::DEFAULT_WORKER_COUNT,
            queue_capacity: courier_delivery::DEFAULT_QUEUE_CAPACITY,
            callback_timeout_ms: courier_delivery::DEFAULT_CALLBACK_TIMEOUT_MS,
            callback_max_retries: courier_delivery::DEFAULT_MAX_RETRIES,
            callback_retry_base_delay_ms: 1000,
            callback_retry_max_delay_ms: 30_000,
            callback_max_connections: courier_delivery::DEFAULT_MAX_CONNECTIONS,
            callback_block_private_ips: true,
            callback_allowed_schemes: vec!["http".to_string(), "https".to_string()],
            request_retention_hours: 24,
            retention_sweep_interval_secs: 3600,
            shutdown_grace_secs: 30,
            rust_log: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, env, sync::Mutex};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct TestEnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        originals: HashMap<String, Option<String>>,
    }

    impl TestEnvGuard {
        fn new() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self { _lock: lock, originals: HashMap::new() }
        }

        fn set_var(&mut self, key: &str, value: &str) {
            self.originals.entry(key.to_string()).or_insert_with(|| env::var(key).ok());
            env::set_var(key, value);
        }
    }

    impl Drop for TestEnvGuard {
        fn drop(&mut self) {
            for (key, original) in &self.originals {
                match original {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }

    fn missing_file() -> std::path::PathBuf {
        env::temp_dir().join(format!("courier-missing-{}.toml", uuid::Uuid::new_v4()))
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 8000);
        assert_eq!(config.worker_count, 10);
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.callback_max_retries, 3);
        assert_eq!(config.database_url, "sqlite://requests.db?mode=rwc");
        assert_eq!(config.retention(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn missing_file_and_empty_env_yield_defaults() {
        let _guard = TestEnvGuard::new();
        let config = Config::load_from(missing_file()).expect("defaults should load");
        assert_eq!(config.port, Config::default().port);
        assert_eq!(config.worker_count, Config::default().worker_count);
    }

    #[test]
    fn env_overrides_defaults() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("COURIER_PORT", "9090");
        guard.set_var("COURIER_WORKER_COUNT", "16");
        guard.set_var("COURIER_QUEUE_CAPACITY", "250");
        guard.set_var("COURIER_CALLBACK_MAX_RETRIES", "5");
        guard.set_var("COURIER_CALLBACK_BLOCK_PRIVATE_IPS", "false");
        guard.set_var("COURIER_DATABASE_URL", "sqlite::memory:");

        let config = Config::load_from(missing_file()).expect("config should load");

        assert_eq!(config.port, 9090);
        assert_eq!(config.worker_count, 16);
        assert_eq!(config.queue_capacity, 250);
        assert_eq!(config.callback_max_retries, 5);
        assert!(!config.callback_block_private_ips);
        assert_eq!(config.database_url, "sqlite::memory:");
    }

    #[test]
    fn toml_file_sits_between_defaults_and_env() {
        let mut guard = TestEnvGuard::new();
        let path = env::temp_dir().join(format!("courier-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "port = 7000\nworker_count = 3\ncallback_allowed_schemes = [\"https\"]\n",
        )
        .unwrap();
        guard.set_var("COURIER_WORKER_COUNT", "4");

        let config = Config::load_from(&path).expect("config should load");
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.callback_allowed_schemes, vec!["https".to_string()]);
    }

    #[test]
    fn invalid_env_value_fails_to_load() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("COURIER_WORKER_COUNT", "0");
        assert!(Config::load_from(missing_file()).is_err());
    }

    #[test]
    fn conversions_carry_values() {
        let config = Config {
            worker_count: 7,
            queue_capacity: 70,
            callback_timeout_ms: 2500,
            callback_max_retries: 6,
            callback_retry_base_delay_ms: 200,
            callback_retry_max_delay_ms: 9000,
            callback_max_connections: 12,
            callback_block_private_ips: false,
            callback_allowed_schemes: vec![" HTTPS ".to_string()],
            shutdown_grace_secs: 12,
            ..Config::default()
        };

        let delivery = config.to_delivery_config();
        assert_eq!(delivery.worker_count, 7);
        assert_eq!(delivery.queue_capacity, 70);
        assert_eq!(delivery.shutdown_timeout, Duration::from_secs(12));
        assert_eq!(delivery.client_config.timeout, Duration::from_millis(2500));
        assert_eq!(delivery.client_config.max_connections, 12);
        assert_eq!(delivery.retry_policy.max_retries, 6);
        assert_eq!(delivery.retry_policy.base_delay, Duration::from_millis(200));
        assert_eq!(delivery.retry_policy.max_delay, Duration::from_millis(9000));
        assert_eq!(delivery.ssrf_policy.allowed_schemes, vec!["https".to_string()]);
        assert!(!delivery.ssrf_policy.block_private_ips);
    }

    #[test]
    fn invalid_config_validation_fails() {
        let mut config = Config { port: 0, ..Config::default() };
        assert!(config.validate().is_err());

        config = Config { worker_count: 0, ..Config::default() };
        assert!(config.validate().is_err());

        config = Config { queue_capacity: 0, ..Config::default() };
        assert!(config.validate().is_err());

        config = Config { callback_allowed_schemes: Vec::new(), ..Config::default() };
        assert!(config.validate().is_err());

        config = Config {
            callback_retry_base_delay_ms: 5000,
            callback_retry_max_delay_ms: 1000,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn socket_address_parsing() {
        let config = Config { host: "127.0.0.1".to_string(), port: 9000, ..Config::default() };
        let addr = config.parse_server_addr().expect("should parse socket address");
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 9000);

        let bad = Config { host: "not-an-ip".to_string(), ..Config::default() };
        assert!(bad.parse_server_addr().is_err());
    }
}
