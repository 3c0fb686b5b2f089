//! Failover Controller Configuration

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Prefix for environment variables shadowing config fields
pub const ENV_PREFIX: &str = "AUTOCLASH_";

/// Main configuration, loaded from TOML and shadowed by `AUTOCLASH_*` variables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoclashConfig {
    /// Control API base address, e.g. `http://127.0.0.1:9090`
    pub api_endpoint: String,
    /// Bearer credential sent on every call
    pub api_key: String,
    /// Endpoint names must match (empty matches everything)
    pub include_regex: String,
    /// Endpoint names must not match (empty excludes nothing)
    pub exclude_regex: String,
    /// URL the service probes through each endpoint
    pub test_url: String,
    /// Seconds between endpoint list refreshes
    pub retrieve_interval: u64,
    /// Seconds between health checks of the active endpoint
    pub current_interval: u64,
    /// Seconds between full latency sweeps
    pub best_interval: u64,
    /// Trials averaged per latency measurement
    pub test_times: u32,
    /// Selector group the controller drives
    pub select_node: String,
    /// Base latency threshold (ms)
    pub latency_threshold: u32,
    /// Delay test timeout passed to the service (ms)
    pub probe_timeout_ms: u64,
    /// Pause between trials of one measurement (ms)
    pub trial_delay_ms: u64,
    /// Timeout for list and switch calls (ms)
    pub request_timeout_ms: u64,
    /// Retry delay after a failed refresh or selection (s)
    pub retry_backoff_secs: u64,
    /// Endpoints measured at the same time
    pub probe_concurrency: usize,
}

impl Default for AutoclashConfig {
    fn default() -> Self {
        Self {
            api_endpoint: String::new(),
            api_key: String::new(),
            include_regex: String::new(),
            exclude_regex: String::new(),
            test_url: "https://www.gstatic.com/generate_204".into(),
            retrieve_interval: 300,
            current_interval: 10,
            best_interval: 600,
            test_times: 3,
            select_node: "🔰 节点选择".into(),
            latency_threshold: 300,
            probe_timeout_ms: 5000,
            trial_delay_ms: 1000,
            request_timeout_ms: 10_000,
            retry_backoff_secs: 10,
            probe_concurrency: 32,
        }
    }
}

impl AutoclashConfig {
    /// Load from a TOML file (YAML is not accepted), apply process environment
    /// overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Shadow fields with `AUTOCLASH_<FIELD>` values; empty values are ignored
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |field: &str| {
            let var = format!("{}{}", ENV_PREFIX, field.to_uppercase());
            lookup(&var).filter(|v| !v.is_empty()).map(|v| (var, v))
        };

        macro_rules! shadow_str {
            ($($field:ident),*) => {$(
                if let Some((_, value)) = get(stringify!($field)) {
                    self.$field = value;
                }
            )*};
        }
        macro_rules! shadow_num {
            ($($field:ident),*) => {$(
                if let Some((var, value)) = get(stringify!($field)) {
                    self.$field = value
                        .trim()
                        .parse()
                        .map_err(|_| ConfigError::EnvOverride { var, value })?;
                }
            )*};
        }

        shadow_str!(
            api_endpoint,
            api_key,
            include_regex,
            exclude_regex,
            test_url,
            select_node
        );
        shadow_num!(
            retrieve_interval,
            current_interval,
            best_interval,
            test_times,
            latency_threshold,
            probe_timeout_ms,
            trial_delay_ms,
            request_timeout_ms,
            retry_backoff_secs,
            probe_concurrency
        );
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("api_endpoint"));
        }
        if self.select_node.is_empty() {
            return Err(ConfigError::Missing("select_node"));
        }
        for (field, value) in [
            ("retrieve_interval", self.retrieve_interval),
            ("current_interval", self.current_interval),
            ("best_interval", self.best_interval),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("retry_backoff_secs", self.retry_backoff_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        if self.test_times == 0 {
            return Err(ConfigError::Invalid {
                field: "test_times",
                reason: "at least one trial is required".into(),
            });
        }
        if self.latency_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "latency_threshold",
                reason: "must be greater than zero".into(),
            });
        }
        if self.probe_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "probe_concurrency",
                reason: "must be greater than zero".into(),
            });
        }
        self.endpoint_filter()?;
        Ok(())
    }

    /// Compile the include/exclude patterns
    pub fn endpoint_filter(&self) -> Result<EndpointFilter, ConfigError> {
        EndpointFilter::new(&self.include_regex, &self.exclude_regex)
    }

    pub fn retrieve_interval(&self) -> Duration {
        Duration::from_secs(self.retrieve_interval)
    }

    pub fn current_interval(&self) -> Duration {
        Duration::from_secs(self.current_interval)
    }

    pub fn best_interval(&self) -> Duration {
        Duration::from_secs(self.best_interval)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn trial_delay(&self) -> Duration {
        Duration::from_millis(self.trial_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

/// Include/exclude name filter
#[derive(Debug, Clone, Default)]
pub struct EndpointFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl EndpointFilter {
    pub fn new(include: &str, exclude: &str) -> Result<Self, ConfigError> {
        let compile = |field: &'static str, pattern: &str| {
            if pattern.is_empty() {
                return Ok(None);
            }
            Regex::new(pattern)
                .map(Some)
                .map_err(|source| ConfigError::InvalidPattern { field, source })
        };
        Ok(Self {
            include: compile("include_regex", include)?,
            exclude: compile("exclude_regex", exclude)?,
        })
    }

    pub fn allows(&self, name: &str) -> bool {
        let included = self.include.as_ref().map_or(true, |re| re.is_match(name));
        let excluded = self.exclude.as_ref().map_or(false, |re| re.is_match(name));
        included && !excluded
    }

    pub fn apply<T, F>(&self, items: Vec<T>, name: F) -> Vec<T>
    where
        F: Fn(&T) -> &str,
    {
        items.into_iter().filter(|item| self.allows(name(item))).collect()
    }
}
