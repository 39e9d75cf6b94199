//! # Runtime Bootstrap
//!
//! Builds the worker pool the sessions and dispatcher run on, and wires up
//! logging. Long-lived cooperative tasks are multiplexed onto this pool;
//! within one session, completion handlers may land on different workers but
//! a single task is never re-entered concurrently.

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{LoggingConfig, RuntimeConfig};
use crate::error::Result;

/// Build a multi-threaded runtime with the configured worker count.
pub fn build(config: &RuntimeConfig) -> Result<tokio::runtime::Runtime> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_io()
        .enable_time()
        .thread_name("node-transport-worker")
        .build()?;
    info!(workers = config.worker_threads, "runtime started");
    Ok(runtime)
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Safe to call more
/// than once; later calls are ignored.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_configured_workers() {
        let runtime = build(&RuntimeConfig { worker_threads: 2 }).unwrap();
        let result = runtime.block_on(async { 21 * 2 });
        assert_eq!(result, 42);
    }

    #[test]
    fn logging_init_is_idempotent() {
        let config = LoggingConfig::default();
        init_logging(&config);
        init_logging(&config);
    }
}
