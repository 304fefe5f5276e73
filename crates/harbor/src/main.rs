use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context as _, Error};
use clap::Parser;
use harbor::{config::Args, handler, signal};
use harbor_mio::{Reactor, ReactorOptions};
use harbor_pool::WorkerPool;
use tracing::{event, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<(), Error> {
    let args = Args::parse();
    init_logging(&args.log)?;

    let base_dir = args
        .base_dir
        .canonicalize()
        .with_context(|| format!("failed to open base directory {:?}", args.base_dir))?;

    let options = args.pool_options();
    event!(
        Level::INFO,
        port = args.port,
        ?base_dir,
        min_threads = options.min_threads,
        max_threads = options.max_threads,
        "starting harbor"
    );

    let pool = Arc::new(WorkerPool::new(options).context("failed to start worker pool")?);
    let handler = handler::router(base_dir, pool.clone());

    let options = ReactorOptions::new(SocketAddr::from(([0, 0, 0, 0], args.port)));
    let reactor = Reactor::bind(options, pool, handler)?;
    signal::stop_on_signal(reactor.stop_handle())?;

    reactor.run()
}

fn init_logging(filter: &str) -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(filter))?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
