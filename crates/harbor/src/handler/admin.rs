use anyhow::Error;
use harbor_mio::Connection;
use harbor_pool::WorkerPool;

use super::response::{self, Status};

pub const STATUS_PATH: &str = "/admin/threadpool-status";

/// Respond with a JSON snapshot of the worker pool.
pub fn send_status(connection: &mut Connection, pool: &WorkerPool<Connection>) -> Result<(), Error> {
    let body = serde_json::to_vec(&pool.status())?;
    response::send(connection, Status::Ok, "application/json", &body)
}
