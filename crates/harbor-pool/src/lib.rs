//! Adaptive worker thread pool.
//!
//! A fixed floor of workers is always kept alive. A manager thread samples the load every few
//! seconds, and adds workers on sustained load or backlog, and retires them again once the pool
//! has been idle for a while.

mod history;
mod options;
mod pool;
mod queue;
mod status;

use thiserror::Error;

pub use self::{
    options::PoolOptions,
    pool::{Completion, WorkerPool},
    queue::Job,
    status::PoolStatus,
};

/// Failed to start a pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Thread bounds are zero or inverted.
    #[error("invalid thread bounds, min {min} max {max}")]
    InvalidBounds { min: usize, max: usize },

    /// History length or batch size is zero.
    #[error("history length and batch size must be at least one")]
    InvalidScaling,

    /// The OS refused to start a thread.
    #[error("failed to spawn pool thread")]
    Spawn(#[source] std::io::Error),
}

/// Failed to submit a task.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// The pool no longer accepts tasks.
    #[error("pool is shutting down")]
    ShuttingDown,
}
