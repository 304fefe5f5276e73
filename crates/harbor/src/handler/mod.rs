//! Request handlers of the file server.

pub mod admin;
pub mod files;
pub mod listing;
pub mod mime;
pub mod response;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context as _, Error};
use harbor_mio::{Connection, RequestHandler};
use harbor_pool::WorkerPool;
use tracing::{event, Level};

use self::response::Status;

/// Build the handler routing requests to the admin endpoint or the file server.
///
/// `base_dir` must be canonical.
pub fn router(base_dir: PathBuf, pool: Arc<WorkerPool<Connection>>) -> RequestHandler {
    Arc::new(move |connection: &mut Connection| -> Result<(), Error> {
        with_fallback(connection, |connection| route(connection, &base_dir, &pool))
    })
}

/// Run `handle`, answering with a 500 if it fails before anything was written.
///
/// Once part of a response is out the error is returned as is, and the connection is closed.
pub fn with_fallback<F>(connection: &mut Connection, handle: F) -> Result<(), Error>
where
    F: FnOnce(&mut Connection) -> Result<(), Error>,
{
    let error = match handle(connection) {
        Ok(()) => return Ok(()),
        Err(error) => error,
    };

    if connection.bytes_written() > 0 {
        return Err(error);
    }

    event!(Level::WARN, peer = ?connection.peer_addr(), "request failed: {:#}", error);
    response::send_error(connection, Status::InternalServerError)
}

fn route(
    connection: &mut Connection,
    base_dir: &Path,
    pool: &WorkerPool<Connection>,
) -> Result<(), Error> {
    let request = connection
        .request()
        .context("handler invoked without a complete request")?;
    let path = request.path().to_string();

    event!(
        Level::DEBUG,
        method = %request.method,
        path = %path,
        peer = ?connection.peer_addr(),
        "handling request"
    );

    if path == admin::STATUS_PATH {
        return admin::send_status(connection, pool);
    }

    files::serve(connection, base_dir, &path)
}
