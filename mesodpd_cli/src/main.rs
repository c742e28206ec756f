#![allow(missing_docs)]

use anyhow::{Context, Result};
use clap::Parser;
use mesodpd::input;
use mesodpd::output::{RestartInfo, TextOutput};
use mesodpd::simulation::Simulation;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// File whose appearance in the job directory requests a cooperative stop.
const STOP_FILE_NAME: &str = "STOP";

#[derive(Parser)]
#[command(name = "mesodpd", about = "Dissipative particle dynamics engine", version)]
struct Opts {
    /// Job directory holding input.txt and the molecule files.
    job: PathBuf,
    /// Output directory; defaults to `<job>/output`.
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
    /// Restart snapshot to resume from.
    #[arg(long, value_name = "FILE")]
    restart: Option<PathBuf>,
    /// Worker threads; 0 picks the number of cores.
    #[arg(default_value_t = 0, long, value_name = "N")]
    threads: usize,
    /// Keep running when an output write fails.
    #[arg(long)]
    best_effort_output: bool,
    /// Skip the per-step position snapshots.
    #[arg(long)]
    no_positions: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    match run(&opts) {
        Ok(stopped) => {
            if stopped {
                tracing::info!("run stopped cooperatively");
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!("{error:#}");
            match error.downcast_ref::<mesodpd::Error>() {
                Some(mesodpd::Error::Config(_)) => ExitCode::from(1),
                _ => ExitCode::from(2),
            }
        }
    }
}

fn run(opts: &Opts) -> Result<bool> {
    let parameters = input::load_job(&opts.job)
        .with_context(|| format!("loading job {}", opts.job.display()))?;

    let output_dir = opts
        .output
        .clone()
        .unwrap_or_else(|| opts.job.join("output"));
    let output = TextOutput::create(&output_dir, opts.best_effort_output, !opts.no_positions)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;

    let restart = match &opts.restart {
        Some(path) => Some(
            RestartInfo::load(path)
                .with_context(|| format!("reading restart snapshot {}", path.display()))?,
        ),
        None => None,
    };

    let stop = Arc::new(AtomicBool::new(false));
    watch_stop_file(&opts.job.join(STOP_FILE_NAME), &stop);

    let threads = if opts.threads == 0 {
        thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    } else {
        opts.threads
    };

    let mut simulation =
        Simulation::new(parameters, Box::new(output), threads, stop, restart)
            .context("constructing the simulation")?;
    let summary = simulation.run().context("running the simulation")?;

    tracing::info!(
        steps = summary.steps_completed,
        temperature = summary.final_temperature,
        "run finished"
    );
    Ok(summary.stopped)
}

// polls for the stop file once a second and raises the shared flag
fn watch_stop_file(path: &std::path::Path, stop: &Arc<AtomicBool>) {
    let path = path.to_path_buf();
    let stop = Arc::clone(stop);
    thread::spawn(move || loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        if path.exists() {
            tracing::info!(file = %path.display(), "stop file detected");
            stop.store(true, Ordering::Relaxed);
            return;
        }
        thread::sleep(Duration::from_secs(1));
    });
}
