//! Sort engine configuration.
//!
//! [`SortConfig`] holds the tuning knobs shared by every backend of a
//! context. It is plain data: a context copies it at construction time.
//!
//! ## Environment
//!
//! The default context reads its configuration with [`SortConfig::from_env`]:
//!
//! | variable | values | effect |
//! |---|---|---|
//! | `HETSORT_RUN_MODE` | `auto`, `gpu`, `multicore`, `serial` | forces the backend |
//! | `HETSORT_THREADS` | positive integer | worker pool size |
//! | `HETSORT_SERIAL_THRESHOLD` | integer | insertion-sort cutoff |
//!
//! Unparseable values are logged and ignored.

use tracing::warn;

use crate::engine::context::BackendHint;
use crate::engine::error::{SortError, SortResult};
use crate::engine::types::{DEFAULT_SERIAL_THRESHOLD, GPU_WORKGROUP_SIZE};

/// Environment variable forcing the default context's backend.
pub const ENV_RUN_MODE: &str = "HETSORT_RUN_MODE";

/// Environment variable setting the worker pool size.
pub const ENV_THREADS: &str = "HETSORT_THREADS";

/// Environment variable setting the serial threshold.
pub const ENV_SERIAL_THRESHOLD: &str = "HETSORT_SERIAL_THRESHOLD";

/// Tuning knobs for one execution context.
///
/// ## Fields
/// * `serial_threshold`: sequences shorter than this are insertion-sorted on
///   the calling thread. Never changes the result, only the path.
/// * `worker_threads`: size of the multicore pool; `None` lets `rayon` pick.
/// * `workgroup_size`: GPU workgroup width; a power of two in `32..=256`.
/// * `prefer_gpu`: whether [`BackendHint::Default`] tries a GPU first.
/// * `backend`: the hint the default context is built with.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortConfig {
    /// Length below which insertion sort is used.
    pub serial_threshold: usize,

    /// Worker pool size for the multicore backend.
    pub worker_threads: Option<usize>,

    /// GPU workgroup width.
    pub workgroup_size: u32,

    /// Try a GPU first when resolving [`BackendHint::Default`].
    pub prefer_gpu: bool,

    /// Backend hint used by the default context.
    pub backend: BackendHint,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            serial_threshold: DEFAULT_SERIAL_THRESHOLD,
            worker_threads: None,
            workgroup_size: GPU_WORKGROUP_SIZE,
            prefer_gpu: true,
            backend: BackendHint::Default,
        }
    }
}

impl SortConfig {
    /// Returns the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the insertion-sort cutoff.
    pub fn with_serial_threshold(mut self, threshold: usize) -> Self {
        self.serial_threshold = threshold;
        self
    }

    /// Sets the worker pool size.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    /// Sets the GPU workgroup width.
    pub fn with_workgroup_size(mut self, size: u32) -> Self {
        self.workgroup_size = size;
        self
    }

    /// Sets whether the default hint tries a GPU first.
    pub fn with_prefer_gpu(mut self, prefer: bool) -> Self {
        self.prefer_gpu = prefer;
        self
    }

    /// Sets the backend hint.
    pub fn with_backend(mut self, backend: BackendHint) -> Self {
        self.backend = backend;
        self
    }

    /// Checks value ranges.
    ///
    /// ## Errors
    /// [`SortError::InvalidConfig`] for a zero-sized pool or a workgroup width
    /// that is not a power of two in `32..=256`.

    pub fn validate(&self) -> SortResult<()> {
        if self.worker_threads == Some(0) {
            return Err(SortError::InvalidConfig("worker_threads must be positive".into()));
        }
        let wg = self.workgroup_size;
        if !wg.is_power_of_two() || !(32..=GPU_WORKGROUP_SIZE).contains(&wg) {
            return Err(SortError::InvalidConfig(format!(
                "workgroup_size {wg} must be a power of two between 32 and {GPU_WORKGROUP_SIZE}"
            )));
        }
        Ok(())
    }

    /// Builds a configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(mode) = lookup(ENV_RUN_MODE) {
            match parse_run_mode(&mode) {
                Some(hint) => config.backend = hint,
                None => warn!(value = %mode, "ignoring unknown {ENV_RUN_MODE}"),
            }
        }

        if let Some(raw) = lookup(ENV_THREADS) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.worker_threads = Some(n),
                _ => warn!(value = %raw, "ignoring invalid {ENV_THREADS}"),
            }
        }

        if let Some(raw) = lookup(ENV_SERIAL_THRESHOLD) {
            match raw.trim().parse::<usize>() {
                Ok(n) => config.serial_threshold = n,
                Err(_) => warn!(value = %raw, "ignoring invalid {ENV_SERIAL_THRESHOLD}"),
            }
        }

        config
    }
}

fn parse_run_mode(value: &str) -> Option<BackendHint> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "auto" | "default" => Some(BackendHint::Default),
        "gpu" => Some(BackendHint::Gpu),
        "multicore" | "parallel" | "cpu" => Some(BackendHint::MultiCore),
        "serial" => Some(BackendHint::Serial),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = SortConfig::default();
        assert_eq!(config.serial_threshold, DEFAULT_SERIAL_THRESHOLD);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = SortConfig::from_lookup(lookup_from(&[
            (ENV_RUN_MODE, "Serial"),
            (ENV_THREADS, "3"),
            (ENV_SERIAL_THRESHOLD, "0"),
        ]));
        assert_eq!(config.backend, BackendHint::Serial);
        assert_eq!(config.worker_threads, Some(3));
        assert_eq!(config.serial_threshold, 0);
    }

    #[test]
    fn bad_env_values_are_ignored() {
        let config = SortConfig::from_lookup(lookup_from(&[
            (ENV_RUN_MODE, "quantum"),
            (ENV_THREADS, "0"),
            (ENV_SERIAL_THRESHOLD, "-4"),
        ]));
        assert_eq!(config, SortConfig::default());
    }

    #[test]
    fn workgroup_size_is_checked() {
        assert!(SortConfig::new().with_workgroup_size(64).validate().is_ok());
        assert!(SortConfig::new().with_workgroup_size(96).validate().is_err());
        assert!(SortConfig::new().with_workgroup_size(512).validate().is_err());
        assert!(SortConfig::new().with_worker_threads(0).validate().is_err());
    }
}
