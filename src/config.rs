//! Configuration for the relaykit binary.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use relaykit_checkpoint::{CheckpointOptions, KvStoreConfig, DEFAULT_STORAGE_KEY};
use relaykit_delivery::{BackoffStrategy, CircuitConfig, ClientConfig, RetryPolicy, WorkerConfig};
use serde::{Deserialize, Serialize};

use crate::file_source::JsonLinesConfig;

const CONFIG_FILE: &str = "relaykit.toml";
const ENV_PREFIX: &str = "RELAYKIT_";

/// Complete relay configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `RELAYKIT_` (highest priority)
/// 2. Configuration file (`relaykit.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Only `target` and `source_path` have no usable default.
///
/// # Example
///
/// ```no_run
/// use relaykit::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
/// println!("delivering to {}", config.target);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Delivery
    /// HTTP endpoint every event is posted to.
    ///
    /// Environment variable: `RELAYKIT_TARGET`
    #[serde(default)]
    pub target: String,
    /// Attempts per event, including the first.
    ///
    /// Environment variable: `RELAYKIT_SEND_ATTEMPTS`
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,
    /// Timeout of a single attempt in milliseconds.
    ///
    /// Environment variable: `RELAYKIT_ATTEMPT_TIMEOUT_MS`
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Idle queue wait in milliseconds.
    ///
    /// Environment variable: `RELAYKIT_POLL_INTERVAL_MS`
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Capacity of the queue between source and worker.
    ///
    /// Environment variable: `RELAYKIT_QUEUE_CAPACITY`
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Maximum wait for the worker loop on shutdown in milliseconds.
    ///
    /// Environment variable: `RELAYKIT_SHUTDOWN_TIMEOUT_MS`
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    // Circuit breaker
    /// Consecutive failed attempts that open the circuit.
    ///
    /// Environment variable: `RELAYKIT_CIRCUIT_FAILURE_THRESHOLD`
    #[serde(default = "default_failure_threshold")]
    pub circuit_failure_threshold: u32,
    /// Open-circuit cool-down in milliseconds.
    ///
    /// Environment variable: `RELAYKIT_CIRCUIT_RESET_TIMEOUT_MS`
    #[serde(default = "default_reset_timeout_ms")]
    pub circuit_reset_timeout_ms: u64,

    // Retry
    /// Base backoff between retries in milliseconds; 0 retries immediately.
    ///
    /// Environment variable: `RELAYKIT_RETRY_BASE_DELAY_MS`
    #[serde(default)]
    pub retry_base_delay_ms: u64,
    /// Maximum backoff between retries in milliseconds.
    ///
    /// Environment variable: `RELAYKIT_RETRY_MAX_DELAY_MS`
    #[serde(default = "default_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    ///
    /// Environment variable: `RELAYKIT_RETRY_JITTER_FACTOR`
    #[serde(default)]
    pub retry_jitter_factor: f64,

    // Checkpointing
    /// Key of the offset snapshot.
    ///
    /// Environment variable: `RELAYKIT_OFFSET_STORAGE_KEY`
    #[serde(default = "default_offset_storage_key")]
    pub offset_storage_key: String,
    /// Offset injected before the first load.
    ///
    /// Environment variable: `RELAYKIT_OFFSET_SEED`
    #[serde(default)]
    pub offset_seed: Option<String>,
    /// Capture engine name used in the seed entry key.
    ///
    /// Environment variable: `RELAYKIT_ENGINE_NAME`
    #[serde(default)]
    pub engine_name: Option<String>,
    /// Captured server name used in the seed entry key.
    ///
    /// Environment variable: `RELAYKIT_SERVER_NAME`
    #[serde(default)]
    pub server_name: Option<String>,
    /// Directory of the file checkpoint backend; unset keeps offsets in memory.
    ///
    /// Environment variable: `RELAYKIT_STORE_DIR`
    #[serde(default)]
    pub store_dir: Option<PathBuf>,

    // Source
    /// Source name, used in logs and the HTTP user agent.
    ///
    /// Environment variable: `RELAYKIT_SOURCE_NAME`
    #[serde(default = "default_source_name")]
    pub source_name: String,
    /// JSON-lines file to relay.
    ///
    /// Environment variable: `RELAYKIT_SOURCE_PATH`
    #[serde(default)]
    pub source_path: Option<PathBuf>,

    // Logging
    /// Log filter used when `RUST_LOG` is unset.
    ///
    /// Environment variable: `RELAYKIT_RUST_LOG`
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, `relaykit.toml`, and `RELAYKIT_`
    /// environment variables.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// Provider chain used by [`Config::load`].
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extracts and validates configuration from `figment`.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Delivery worker configuration.
    pub fn to_worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            target: self.target.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            circuit: self.to_circuit_config(),
            client: self.to_client_config(),
        }
    }

    /// Circuit breaker configuration; `max_retries` is `send_attempts - 1`.
    pub fn to_circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            max_retries: self.send_attempts.saturating_sub(1),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            failure_threshold: self.circuit_failure_threshold,
            reset_timeout: Duration::from_millis(self.circuit_reset_timeout_ms),
            retry_policy: self.to_retry_policy(),
        }
    }

    /// Backoff between retries.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            jitter_factor: self.retry_jitter_factor,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }

    /// HTTP client configuration; the request timeout follows the attempt timeout.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig { timeout: Duration::from_millis(self.attempt_timeout_ms), ..ClientConfig::default() }
    }

    /// Checkpoint store options.
    pub fn to_checkpoint_options(&self) -> CheckpointOptions {
        CheckpointOptions {
            storage_key: Some(self.offset_storage_key.clone()),
            seed_offset: self.offset_seed.clone(),
            engine_name: self.engine_name.clone(),
            server_name: self.server_name.clone(),
        }
    }

    /// Checkpoint backend selection.
    pub fn to_kv_store_config(&self) -> KvStoreConfig {
        match &self.store_dir {
            Some(dir) => KvStoreConfig::File { dir: dir.clone() },
            None => KvStoreConfig::Memory,
        }
    }

    /// JSON-lines source configuration.
    pub fn to_source_config(&self) -> Result<JsonLinesConfig> {
        let path = self.source_path.clone().context("source_path must be set")?;
        Ok(JsonLinesConfig {
            name: self.source_name.clone(),
            path,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            queue_capacity: self.queue_capacity,
        })
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.target.trim().is_empty() {
            anyhow::bail!("target must be set");
        }

        if self.send_attempts == 0 {
            anyhow::bail!("send_attempts must be greater than 0");
        }

        if self.attempt_timeout_ms == 0 {
            anyhow::bail!("attempt_timeout_ms must be greater than 0");
        }

        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }

        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }

        if self.circuit_failure_threshold == 0 {
            anyhow::bail!("circuit_failure_threshold must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            anyhow::bail!("retry_max_delay_ms cannot be less than retry_base_delay_ms");
        }

        if self.source_name.trim().is_empty() {
            anyhow::bail!("source_name must not be empty");
        }

        if self.source_path.is_none() {
            anyhow::bail!("source_path must be set");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: String::new(),
            send_attempts: default_send_attempts(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            queue_capacity: default_queue_capacity(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            circuit_failure_threshold: default_failure_threshold(),
            circuit_reset_timeout_ms: default_reset_timeout_ms(),
            retry_base_delay_ms: 0,
            retry_max_delay_ms: default_max_delay_ms(),
            retry_jitter_factor: 0.0,
            offset_storage_key: default_offset_storage_key(),
            offset_seed: None,
            engine_name: None,
            server_name: None,
            store_dir: None,
            source_name: default_source_name(),
            source_path: None,
            rust_log: default_log_level(),
        }
    }
}

fn default_send_attempts() -> u32 {
    3
}

fn default_attempt_timeout_ms() -> u64 {
    3000
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_queue_capacity() -> usize {
    100
}

fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_offset_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

fn default_source_name() -> String {
    "jsonl".to_string()
}

fn default_log_level() -> String {
    "info,relaykit=debug".to_string()
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
            for (var, original) in &self.originals {
                match original {
                    Some(value) => env::set_var(var, value),
                    None => env::remove_var(var),
                }
            }
        }
    }

    fn minimal() -> Config {
        Config {
            target: "http://localhost:8080/events".to_string(),
            source_path: Some(PathBuf::from("/tmp/events.jsonl")),
            ..Config::default()
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = minimal();
        assert!(config.validate().is_ok());

        let worker = config.to_worker_config();
        assert_eq!(worker.circuit.max_retries, 2);
        assert_eq!(worker.circuit.attempt_timeout, Duration::from_millis(3000));
        assert_eq!(worker.circuit.failure_threshold, 5);
        assert_eq!(worker.circuit.reset_timeout, Duration::from_secs(30));
        assert_eq!(worker.circuit.retry_policy.delay_for_retry(1), Duration::ZERO);
        assert_eq!(worker.poll_interval, Duration::from_secs(5));
        assert_eq!(worker.client.timeout, Duration::from_millis(3000));

        assert_eq!(config.to_checkpoint_options().resolved_key(), "cdk_debezium_offset");
        assert_eq!(config.to_kv_store_config(), KvStoreConfig::Memory);
        assert_eq!(config.rust_log, "info,relaykit=debug");
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let figment = Figment::new().merge(Serialized::defaults(Config::default())).merge(Toml::string(
            r#"
            target = "https://sink.example.com/events"
            send_attempts = 5
            store_dir = "/var/lib/relaykit"
            source_path = "/var/log/orders.jsonl"
            engine_name = "orders"
            server_name = "db1"
            offset_seed = "{\"pos\":42}"
            "#,
        ));

        let config = Config::from_figment(figment).unwrap();

        assert_eq!(config.to_circuit_config().max_retries, 4);
        assert_eq!(config.to_kv_store_config(), KvStoreConfig::File { dir: PathBuf::from("/var/lib/relaykit") });
        let seed = config.to_checkpoint_options().seed_entry().unwrap();
        assert_eq!(seed, (r#"["orders",{"server":"db1"}]"#.to_string(), "{\"pos\":42}".to_string()));
    }

    #[test]
    fn env_overrides_with_prefix() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("RELAYKIT_TARGET", "http://10.0.0.5:9000/ingest");
        guard.set_var("RELAYKIT_SOURCE_PATH", "/data/in.jsonl");
        guard.set_var("RELAYKIT_ATTEMPT_TIMEOUT_MS", "750");
        guard.set_var("RELAYKIT_QUEUE_CAPACITY", "8");

        let config = Config::load().expect("Config should load with env overrides");

        assert_eq!(config.target, "http://10.0.0.5:9000/ingest");
        assert_eq!(config.to_worker_config().circuit.attempt_timeout, Duration::from_millis(750));
        assert_eq!(config.to_source_config().unwrap().queue_capacity, 8);
    }

    #[test]
    fn invalid_config_validation_fails() {
        let mut config = minimal();
        config.target = String::new();
        assert!(config.validate().is_err());

        config = minimal();
        config.send_attempts = 0;
        assert!(config.validate().is_err());

        config = minimal();
        config.queue_capacity = 0;
        assert!(config.validate().is_err());

        config = minimal();
        config.retry_jitter_factor = 1.5;
        assert!(config.validate().is_err());

        config = minimal();
        config.retry_base_delay_ms = 20_000;
        assert!(config.validate().is_err());

        config = minimal();
        config.source_path = None;
        assert!(config.validate().is_err());
    }
}
