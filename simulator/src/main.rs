mod args;
mod backend;
mod driver;
mod logging;
mod model;
mod oracle;
mod scheduler;

use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::Level;

use crate::args::{Args, SimConfig};
use crate::driver::run;
use crate::logging::LogWriter;

fn main() {
    let args = Args::parse();
    let config = SimConfig::from_args(args);
    let writer = LogWriter::new(config.log.clone()).unwrap_or_else(|err| {
        eprintln!("failed to open log file: {err}");
        std::process::exit(1);
    });

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let config_json = serde_json::to_string_pretty(&config).unwrap_or_else(|_| "{}".to_string());
    tracing::info!("config: {}", config_json);

    // One scheduler thread keeps step order a function of the seed; handle
    // work still runs on the blocking pool or the writer threads.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!("failed to build runtime: {err}");
            std::process::exit(1);
        }
    };

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let seed = config.seed;
    let tasks = config.tasks;
    let pool_size = config.pool_size;
    match runtime.block_on(run(config, &mut rng)) {
        Ok(summary) => tracing::info!(
            "complete: steps={} time={}ms tasks={} pool_size={} busy={} waits={}",
            summary.steps,
            summary.now_ms,
            tasks,
            pool_size,
            summary.busy,
            summary.waits
        ),
        Err(_) => {
            tracing::error!("replay with --seed {seed}");
            std::process::exit(1);
        }
    }
}
