use anyhow::{Context as _, Error};
use harbor_mio::StopHandle;
use tracing::{event, Level};

/// Stop the reactor behind `stop` on SIGINT or SIGTERM.
///
/// Can only be installed once per process.
pub fn stop_on_signal(stop: StopHandle) -> Result<(), Error> {
    ctrlc::set_handler(move || {
        event!(Level::INFO, "signal received, stopping");

        if let Err(error) = stop.stop() {
            event!(Level::ERROR, "failed to stop reactor: {:#}", error);
        }
    })
    .context("failed to install signal handler")?;

    Ok(())
}
