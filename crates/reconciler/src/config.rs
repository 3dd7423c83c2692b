//! Configuration for the controller.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Finalizer token claimed by this controller on `ConfigSpec` records.
pub const DEFAULT_FINALIZER: &str = "configspec.finalizers.confsync.dev";

/// Configuration for the controller and its reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of parallel reconciliation workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Interval between full resyncs. Zero disables resync.
    #[serde(with = "duration_secs", default = "default_resync_interval")]
    pub resync_interval: Duration,

    /// Upper bound on a single reconciliation pass.
    #[serde(with = "duration_secs", default = "default_pass_timeout")]
    pub pass_timeout: Duration,

    /// How long in-flight passes may run after shutdown is requested.
    #[serde(with = "duration_secs", default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,

    /// Requeue delay after the first failure of an identity.
    #[serde(with = "duration_millis", default = "default_backoff_base")]
    pub backoff_base: Duration,

    /// Cap on the requeue delay.
    #[serde(with = "duration_millis", default = "default_backoff_max")]
    pub backoff_max: Duration,

    /// Finalizer token placed on records.
    #[serde(default = "default_finalizer")]
    pub finalizer: String,

    /// Only reconcile records in this namespace.
    #[serde(default)]
    pub namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            resync_interval: default_resync_interval(),
            pass_timeout: default_pass_timeout(),
            shutdown_grace: default_shutdown_grace(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
            finalizer: default_finalizer(),
            namespace: None,
        }
    }
}

impl ControllerConfig {
    /// Set the worker count.
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the resync interval.
    #[must_use]
    pub const fn resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Set the pass timeout.
    #[must_use]
    pub const fn pass_timeout(mut self, timeout: Duration) -> Self {
        self.pass_timeout = timeout;
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the backoff range.
    #[must_use]
    pub const fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Set the finalizer token.
    #[must_use]
    pub fn finalizer(mut self, token: impl Into<String>) -> Self {
        self.finalizer = token.into();
        self
    }

    /// Restrict reconciliation to one namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Check the configuration for values the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.pass_timeout.is_zero() {
            return Err(Error::invalid_config("pass_timeout must be positive"));
        }
        if self.backoff_base > self.backoff_max {
            return Err(Error::invalid_config(
                "backoff_base must not exceed backoff_max",
            ));
        }
        if self.finalizer.is_empty() || self.finalizer.chars().any(char::is_whitespace) {
            return Err(Error::invalid_config(format!(
                "finalizer '{}' must be a non-empty token without whitespace",
                self.finalizer
            )));
        }
        Ok(())
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `CONFSYNC_*` environment variables on top of this config.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(workers) = env_parse::<usize>("CONFSYNC_WORKERS") {
            self.workers = workers;
        }
        if let Some(secs) = env_parse::<u64>("CONFSYNC_RESYNC_SECS") {
            self.resync_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("CONFSYNC_PASS_TIMEOUT_SECS") {
            self.pass_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("CONFSYNC_SHUTDOWN_GRACE_SECS") {
            self.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(millis) = env_parse::<u64>("CONFSYNC_BACKOFF_BASE_MS") {
            self.backoff_base = Duration::from_millis(millis);
        }
        if let Some(millis) = env_parse::<u64>("CONFSYNC_BACKOFF_MAX_MS") {
            self.backoff_max = Duration::from_millis(millis);
        }
        if let Ok(token) = std::env::var("CONFSYNC_FINALIZER") {
            self.finalizer = token;
        }
        if let Ok(namespace) = std::env::var("CONFSYNC_NAMESPACE") {
            self.namespace = Some(namespace);
        }
        self
    }

    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config_read(path, e.to_string()))?;

        // JSON by extension, TOML otherwise
        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("failed to parse config: {e}")))
        } else {
            toml::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("failed to parse config: {e}")))
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    std::env::var(name)
        .ok()
        .and_then(|raw| parse_override(name, &raw))
}

/// Parse one override value; a malformed value is ignored with a warning.
fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(variable = name, value = raw, error = %e, "Ignoring malformed override");
            None
        }
    }
}

const fn default_workers() -> usize {
    2
}

const fn default_resync_interval() -> Duration {
    Duration::from_secs(600) // 10 minutes
}

const fn default_pass_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

const fn default_backoff_base() -> Duration {
    Duration::from_millis(5)
}

const fn default_backoff_max() -> Duration {
    Duration::from_secs(300)
}

fn default_finalizer() -> String {
    DEFAULT_FINALIZER.to_string()
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serialization helper for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
