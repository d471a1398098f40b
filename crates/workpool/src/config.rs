//! Pool configuration
//!
//! Configuration can be built in code with the `with_*` methods or loaded
//! from environment variables with [`PoolConfig::from_env`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;
use crate::restart::RestartPolicy;

/// What `submit` does when the pending buffer is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Suspend the submitter until a slot frees
    #[default]
    Block,
    /// Fail immediately with [`PoolError::QueueFull`]
    Reject,
}

impl SubmitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Reject => "reject",
        }
    }
}

impl std::fmt::Display for SubmitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmitMode {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "block" | "blocking" => Ok(Self::Block),
            "reject" | "non_blocking" | "nonblocking" => Ok(Self::Reject),
            other => Err(PoolError::Config(format!("unknown submit mode: {other}"))),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Pool name, used in log fields
    pub name: String,

    /// Number of workers (W), fixed for the pool's lifetime
    pub worker_count: usize,

    /// Pending buffer capacity (C); 0 means rendezvous-only hand-off
    pub queue_capacity: usize,

    /// Behaviour of `submit` when the buffer is full
    #[serde(default)]
    pub submit_mode: SubmitMode,

    /// Upper bound on how long `shutdown` waits for workers
    #[serde(default, with = "option_duration_millis")]
    pub shutdown_timeout: Option<Duration>,

    /// Delay policy for replacing faulted workers
    #[serde(default)]
    pub restart: RestartPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "workpool".to_string(),
            worker_count: num_cpus::get(),
            queue_capacity: 128,
            submit_mode: SubmitMode::Block,
            shutdown_timeout: None,
            restart: RestartPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with W workers and a buffer of C pending tasks
    pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
        Self {
            worker_count,
            queue_capacity,
            ..Default::default()
        }
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the worker count
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the pending buffer capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the submit mode
    pub fn with_submit_mode(mut self, mode: SubmitMode) -> Self {
        self.submit_mode = mode;
        self
    }

    /// Bound how long `shutdown` waits for workers
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Set the restart policy for faulted workers
    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    /// Check that the configuration can build a pool
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.worker_count == 0 {
            return Err(PoolError::Config(
                "worker_count must be greater than zero".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(PoolError::Config("name must not be empty".to_string()));
        }
        if self.restart.max_delay < self.restart.initial_delay {
            return Err(PoolError::Config(
                "restart max_delay must not be below initial_delay".to_string(),
            ));
        }
        let coefficient = self.restart.backoff_coefficient;
        if !coefficient.is_finite() || coefficient < 1.0 {
            return Err(PoolError::Config(format!(
                "restart backoff_coefficient must be a finite value of at least 1.0, got {coefficient}"
            )));
        }
        if !(0.0..=1.0).contains(&self.restart.jitter) {
            return Err(PoolError::Config(format!(
                "restart jitter must be between 0.0 and 1.0, got {}",
                self.restart.jitter
            )));
        }
        Ok(())
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `WORKPOOL_NAME`: Pool name (default: workpool)
    /// - `WORKPOOL_WORKERS`: Worker count (default: number of CPUs)
    /// - `WORKPOOL_QUEUE_CAPACITY`: Pending buffer capacity (default: 128)
    /// - `WORKPOOL_SUBMIT_MODE`: `block` or `reject` (default: block)
    /// - `WORKPOOL_SHUTDOWN_TIMEOUT_MS`: Shutdown deadline in milliseconds (default: none)
    pub fn from_env() -> Result<Self, PoolError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, PoolError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("WORKPOOL_NAME") {
            config.name = name;
        }
        if let Some(workers) = lookup("WORKPOOL_WORKERS") {
            config.worker_count = parse_var("WORKPOOL_WORKERS", &workers)?;
        }
        if let Some(capacity) = lookup("WORKPOOL_QUEUE_CAPACITY") {
            config.queue_capacity = parse_var("WORKPOOL_QUEUE_CAPACITY", &capacity)?;
        }
        if let Some(mode) = lookup("WORKPOOL_SUBMIT_MODE") {
            config.submit_mode = mode.parse()?;
        }
        if let Some(timeout) = lookup("WORKPOOL_SHUTDOWN_TIMEOUT_MS") {
            let millis: u64 = parse_var("WORKPOOL_SHUTDOWN_TIMEOUT_MS", &timeout)?;
            config.shutdown_timeout = Some(Duration::from_millis(millis));
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<V: FromStr>(key: &str, value: &str) -> Result<V, PoolError> {
    value
        .trim()
        .parse()
        .map_err(|_| PoolError::Config(format!("{key} has an invalid value: {value:?}")))
}

/// Serde helper for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.name, "workpool");
        assert!(config.worker_count >= 1);
        assert_eq!(config.queue_capacity, 128);
        assert_eq!(config.submit_mode, SubmitMode::Block);
        assert!(config.shutdown_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = PoolConfig::new(2, 0)
            .with_name("ingest")
            .with_submit_mode(SubmitMode::Reject)
            .with_shutdown_timeout(Duration::from_secs(3));

        assert_eq!(config.worker_count, 2);
        assert_eq!(config.queue_capacity, 0);
        assert_eq!(config.name, "ingest");
        assert_eq!(config.submit_mode, SubmitMode::Reject);
        assert_eq!(config.shutdown_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let result = PoolConfig::new(0, 4).validate();
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[test]
    fn test_submit_mode_parse() {
        assert_eq!("block".parse::<SubmitMode>().unwrap(), SubmitMode::Block);
        assert_eq!(" Reject ".parse::<SubmitMode>().unwrap(), SubmitMode::Reject);
        assert!("sometimes".parse::<SubmitMode>().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let config = PoolConfig::from_lookup(lookup(&[
            ("WORKPOOL_NAME", "images"),
            ("WORKPOOL_WORKERS", "3"),
            ("WORKPOOL_QUEUE_CAPACITY", "0"),
            ("WORKPOOL_SUBMIT_MODE", "reject"),
            ("WORKPOOL_SHUTDOWN_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();

        assert_eq!(config.name, "images");
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.queue_capacity, 0);
        assert_eq!(config.submit_mode, SubmitMode::Reject);
        assert_eq!(config.shutdown_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = PoolConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.queue_capacity, 128);
    }

    #[test]
    fn test_from_lookup_invalid_values() {
        let result = PoolConfig::from_lookup(lookup(&[("WORKPOOL_WORKERS", "many")]));
        assert!(matches!(result, Err(PoolError::Config(msg)) if msg.contains("WORKPOOL_WORKERS")));

        let result = PoolConfig::from_lookup(lookup(&[("WORKPOOL_WORKERS", "0")]));
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[test]
    fn test_serialization() {
        let config = PoolConfig::new(4, 16).with_shutdown_timeout(Duration::from_millis(250));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["shutdown_timeout"], 250);
        assert_eq!(json["submit_mode"], "block");

        let parsed: PoolConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_deserialized_restart_policy_is_validated() {
        let parse = |restart: serde_json::Value| -> PoolConfig {
            serde_json::from_value(serde_json::json!({
                "name": "p",
                "worker_count": 2,
                "queue_capacity": 1,
                "restart": restart,
            }))
            .unwrap()
        };

        let negative = parse(serde_json::json!({
            "initial_delay": 50,
            "max_delay": 5000,
            "backoff_coefficient": -2.0,
            "jitter": 0.1,
        }));
        assert!(
            matches!(negative.validate(), Err(PoolError::Config(msg)) if msg.contains("backoff_coefficient"))
        );

        let wide_jitter = parse(serde_json::json!({
            "initial_delay": 50,
            "max_delay": 5000,
            "backoff_coefficient": 2.0,
            "jitter": 1.5,
        }));
        assert!(
            matches!(wide_jitter.validate(), Err(PoolError::Config(msg)) if msg.contains("jitter"))
        );

        let mut config = PoolConfig::new(1, 1);
        config.restart.backoff_coefficient = f64::NAN;
        assert!(config.validate().is_err());
        config.restart.backoff_coefficient = 1.0;
        config.restart.jitter = -0.1;
        assert!(config.validate().is_err());
        config.restart.jitter = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_minimal() {
        let parsed: PoolConfig =
            serde_json::from_str(r#"{"name":"p","worker_count":2,"queue_capacity":1}"#).unwrap();
        assert_eq!(parsed.submit_mode, SubmitMode::Block);
        assert!(parsed.shutdown_timeout.is_none());
        assert_eq!(parsed.restart, RestartPolicy::default());
    }
}
