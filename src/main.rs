mod pipelines;
mod utils;
mod config;
mod cli;

use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::{Builder, Target};
use log::{self, LevelFilter, debug, error, info, warn};

use crate::cli::parse;
use crate::config::defs::{LocalLayout, RunConfig};
use crate::utils::file::TeeWriter;
use crate::utils::signals::SignalGuard;
use crate::utils::system::detect_cores_and_load;
use pipelines::gpl;


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let dir = env::current_dir()?;
    let scratch = PathBuf::from(&args.scratch_dir);
    let layout = LocalLayout::new(if scratch.is_absolute() { scratch } else { dir.join(scratch) });

    let (log_target, log_error) = match TeeWriter::new(&layout.harness_log_path()) {
        Ok(tee) => (tee, None),
        Err(e) => (TeeWriter::stderr_only(), Some(e)),
    };
    Builder::new()
        .filter_level(log_level)
        .target(Target::Pipe(Box::new(log_target)))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();
    if let Some(e) = log_error {
        warn!("Could not open {}: {}; logging to stderr only", layout.harness_log_path().display(), e);
    }

    println!("\n-------------\n GPL runner\n-------------\n");
    info!("The current directory is {:?}", dir);
    info!("The scratch directory is {:?}", layout.root);

    let (cpus, cpu_load) = detect_cores_and_load(args.cpu_count).await?;
    debug!("Using {} cpus per process; CPU load {}%", cpus, cpu_load);

    let intercept_sigusr = args.intercept_sigusr;
    let run_config = Arc::new(RunConfig {
        layout,
        cpus,
        args,
    });

    let context = match gpl::prepare(&run_config) {
        Ok(context) => context,
        Err(e) => {
            error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
            std::process::exit(1);
        }
    };

    let guard = match SignalGuard::arm(context.publisher.clone(), intercept_sigusr) {
        Ok(guard) => guard,
        Err(e) => {
            error!("Failed to install signal handlers: {}", e);
            std::process::exit(1);
        }
    };

    let result = gpl::run(run_config.clone(), &context).await;
    guard.yield_to_handler().await;

    if let Err(e) = result {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}
