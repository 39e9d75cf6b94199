//! # Configuration
//!
//! Centralized configuration for the transport runtime.
//!
//! Defaults match the constants the protocol was designed around: an
//! eight-worker pool, 8192-slot session queues, four adapter tasks, and
//! 64 KiB write batches. Values load from TOML files or strings, with a few
//! environment-variable overrides for deployment tweaks.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};

/// Top-level configuration tree.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NodeConfig {
    /// Worker-pool settings
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Per-session transport settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            NodeError::Config(format!(
                "failed to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| NodeError::Config(format!("failed to parse TOML: {e}")))
    }

    /// Defaults with environment-variable overrides applied.
    ///
    /// Recognized variables: `NODE_TRANSPORT_WORKER_THREADS`,
    /// `NODE_TRANSPORT_QUEUE_CAPACITY`, `NODE_TRANSPORT_LOG_LEVEL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(workers) = std::env::var("NODE_TRANSPORT_WORKER_THREADS") {
            if let Ok(v) = workers.parse::<usize>() {
                config.runtime.worker_threads = v;
            }
        }
        if let Ok(capacity) = std::env::var("NODE_TRANSPORT_QUEUE_CAPACITY") {
            if let Ok(v) = capacity.parse::<usize>() {
                config.session.queue_capacity = v;
            }
        }
        if let Ok(level) = std::env::var("NODE_TRANSPORT_LOG_LEVEL") {
            config.logging.level = level;
        }

        config
    }

    /// Collect every problem with this configuration. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.runtime.validate());
        errors.extend(self.session.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// [`validate`](Self::validate) as a hard failure.
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(NodeError::Config(format!(
                "configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Worker-pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads in the executor pool.
    pub worker_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { worker_threads: 8 }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.worker_threads == 0 {
            errors.push("worker_threads must be greater than 0".to_string());
        } else if self.worker_threads > 512 {
            errors.push(format!(
                "worker_threads very high: {} (ensure the host can support this)",
                self.worker_threads
            ));
        }
        errors
    }
}

/// Per-session transport settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity of each lock-free queue (raw chunks, framed ingress, egress).
    pub queue_capacity: usize,

    /// Number of adapter tasks deserializing inbound frames in parallel.
    pub adapter_tasks: usize,

    /// Maximum frames folded into one socket write.
    pub write_batch_frames: usize,

    /// Target size of one socket write; draining stops once reached.
    pub write_batch_bytes: usize,

    /// When the reusable write buffer grows past this, it is shrunk back to
    /// `write_batch_bytes`.
    pub write_shrink_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 8192,
            adapter_tasks: 4,
            write_batch_frames: 1000,
            write_batch_bytes: 64 * 1024,
            write_shrink_bytes: 1024 * 1024,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.queue_capacity == 0 {
            errors.push("queue_capacity must be greater than 0".to_string());
        }
        if self.adapter_tasks == 0 {
            errors.push("adapter_tasks must be greater than 0".to_string());
        }
        if self.write_batch_frames == 0 {
            errors.push("write_batch_frames must be greater than 0".to_string());
        }
        if self.write_batch_bytes == 0 {
            errors.push("write_batch_bytes must be greater than 0".to_string());
        }
        if self.write_shrink_bytes < self.write_batch_bytes {
            errors.push(
                "write_shrink_bytes cannot be smaller than write_batch_bytes".to_string(),
            );
        }
        errors
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (`trace`, `debug`, `info`, `warn`, `error`), also
    /// accepting full `tracing_subscriber::EnvFilter` directives.
    pub level: String,

    /// Emit ANSI colors.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.level.is_empty() {
            errors.push("logging level cannot be empty".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_empty());
        assert_eq!(config.runtime.worker_threads, 8);
        assert_eq!(config.session.queue_capacity, 8192);
        assert_eq!(config.session.adapter_tasks, 4);
    }

    #[test]
    fn toml_round_trip() {
        let config = NodeConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = NodeConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.session.write_batch_bytes, 64 * 1024);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let parsed = NodeConfig::from_toml("[session]\nqueue_capacity = 16\n").unwrap();
        assert_eq!(parsed.session.queue_capacity, 16);
        assert_eq!(parsed.session.adapter_tasks, 4);
        assert_eq!(parsed.runtime.worker_threads, 8);
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut config = NodeConfig::default();
        config.session.queue_capacity = 0;
        config.session.write_shrink_bytes = 1;
        let errors = config.validate();
        assert_eq!(errors.len(), 2);
        assert!(config.validate_strict().is_err());
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(
            NodeConfig::from_toml("not toml ["),
            Err(NodeError::Config(_))
        ));
    }
}
