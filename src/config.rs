//! Resolved configuration for the backend supervisor.
//!
//! This crate does not parse environment variables or config files; the
//! embedding service resolves its own settings and hands over a
//! [`GlobalConfig`]. The types here still support serde deserialization with
//! per-field defaults so the embedder can lift them straight out of its own
//! config document.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Log levels the backend process accepts.
const BACKEND_LOG_LEVELS: [&str; 5] = ["ERROR", "WARN", "INFO", "DEBUG", "TRACE"];

/// Which backend engine implementation to launch.
///
/// Both engines expose the same wire behavior and environment contract; the
/// choice is made once per instance from configuration and never changes
/// while that instance is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Script-hosted build, launched with `node`.
    #[default]
    Node,
    /// VM-hosted build, launched as a `java -jar` managed archive.
    Scala,
}

impl Engine {
    /// Name used in logs and error messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Scala => "scala",
        }
    }
}

/// Already-resolved global settings consumed by the supervisor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Engine implementation to launch for new instances.
    pub engine: Engine,
    /// Host address handed to callers for routing.
    pub host: String,
    /// Root data directory; persistence state lives in its `kinesis/`
    /// subdirectory. `None` disables persistence regardless of the flag.
    pub data_dir: Option<PathBuf>,
    /// Whether backend instances should persist stream state to disk.
    pub persistence: bool,
    /// Flush interval handed to the backend, e.g. `"5s"`.
    pub persist_interval: String,
    /// Maximum number of shards per account.
    pub shard_limit: u32,
    /// Maximum number of on-demand streams per account.
    pub on_demand_stream_count_limit: u32,
    /// Artificial latency applied to latency-sensitive operations.
    pub latency_ms: u64,
    /// Explicit backend log level; overrides the mapping from `log_level`.
    pub backend_log_level: Option<String>,
    /// Global service log level, mapped onto the backend's accepted set.
    pub log_level: Option<String>,
    /// Initial JVM heap size for the Scala engine, e.g. `"256m"`.
    pub initial_heap_size: String,
    /// Maximum JVM heap size for the Scala engine, e.g. `"512m"`.
    pub maximum_heap_size: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            engine: Engine::default(),
            host: "localhost".to_string(),
            data_dir: None,
            persistence: false,
            persist_interval: "5s".to_string(),
            shard_limit: 100,
            on_demand_stream_count_limit: 10,
            latency_ms: 500,
            backend_log_level: None,
            log_level: None,
            initial_heap_size: "256m".to_string(),
            maximum_heap_size: "512m".to_string(),
        }
    }
}

impl GlobalConfig {
    /// Latency value in the backend's duration syntax (`"<ms>ms"`).
    #[must_use]
    pub fn latency(&self) -> String {
        format!("{}ms", self.latency_ms)
    }

    /// Latency as a [`Duration`], for callers that want to reason about it.
    #[must_use]
    pub fn latency_duration(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// Effective backend log level for new instances.
    #[must_use]
    pub fn resolved_log_level(&self) -> String {
        resolve_log_level(self.backend_log_level.as_deref(), self.log_level.as_deref())
    }
}

/// Map the service-wide log level onto the set the backend accepts.
///
/// An explicit backend override always wins. Otherwise the global level is
/// translated (`WARNING` → `WARN`, `TRACE-INTERNAL` → `TRACE`) and anything
/// the backend would reject collapses to `INFO`.
#[must_use]
pub fn resolve_log_level(backend_override: Option<&str>, global: Option<&str>) -> String {
    if let Some(level) = backend_override {
        return level.to_uppercase();
    }
    let Some(global) = global else {
        return "INFO".to_string();
    };
    let global = global.to_uppercase();
    match global.as_str() {
        "WARNING" => "WARN".to_string(),
        "TRACE-INTERNAL" => "TRACE".to_string(),
        level if BACKEND_LOG_LEVELS.contains(&level) => global,
        _ => "INFO".to_string(),
    }
}
