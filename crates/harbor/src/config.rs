use std::path::PathBuf;

use clap::Parser;
use harbor_pool::PoolOptions;

/// Command line configuration of the server.
#[derive(Debug, Clone, Parser)]
#[command(name = "harbor")]
#[command(about = "Static file HTTP server with an adaptive worker pool")]
#[command(version)]
pub struct Args {
    /// Port to listen on, on all interfaces
    pub port: u16,

    /// Directory files are served from
    pub base_dir: PathBuf,

    /// Workers kept alive when idle, defaults to the available parallelism
    #[arg(long, env = "HARBOR_MIN_THREADS")]
    pub min_threads: Option<usize>,

    /// Upper bound on workers, defaults to twice the available parallelism
    #[arg(long, env = "HARBOR_MAX_THREADS")]
    pub max_threads: Option<usize>,

    /// Log filter, `RUST_LOG` takes precedence when set
    #[arg(long, default_value = "info")]
    pub log: String,
}

impl Args {
    pub fn pool_options(&self) -> PoolOptions {
        let defaults = PoolOptions::default();

        let min_threads = self.min_threads.unwrap_or(defaults.min_threads);
        let max_threads = self
            .max_threads
            .unwrap_or_else(|| defaults.max_threads.max(min_threads));

        PoolOptions {
            min_threads,
            max_threads,
            ..defaults
        }
    }
}
