use std::{num::NonZeroUsize, thread, time::Duration};

use crate::PoolError;

/// Sizing and scaling configuration of a `WorkerPool`.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub min_threads: usize,
    pub max_threads: usize,
    /// Interval between manager scaling decisions.
    pub manage_interval: Duration,
    /// Number of load samples averaged by the manager.
    pub history_len: usize,
    /// Average load factor above which the pool grows.
    pub grow_threshold: f32,
    /// Average load factor below which the pool shrinks.
    pub shrink_threshold: f32,
    /// Minimum time between two shrinks.
    pub shrink_cooldown: Duration,
    /// Maximum number of workers added or removed in one decision.
    pub batch: usize,
    /// Prefix for worker thread names.
    pub thread_name: String,
}

impl PoolOptions {
    pub fn new(min_threads: usize, max_threads: usize) -> Self {
        Self {
            min_threads,
            max_threads,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), PoolError> {
        if self.min_threads == 0 || self.min_threads > self.max_threads {
            return Err(PoolError::InvalidBounds {
                min: self.min_threads,
                max: self.max_threads,
            });
        }

        if self.history_len == 0 || self.batch == 0 {
            return Err(PoolError::InvalidScaling);
        }

        Ok(())
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        let cores = thread::available_parallelism().map_or(4, NonZeroUsize::get);

        Self {
            min_threads: cores,
            max_threads: cores * 2,
            manage_interval: Duration::from_secs(3),
            history_len: 10,
            grow_threshold: 0.7,
            shrink_threshold: 0.3,
            shrink_cooldown: Duration::from_secs(10),
            batch: 2,
            thread_name: "harbor-worker".to_string(),
        }
    }
}
