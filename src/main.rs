//! Tidewater - mode-partitioned run loop
//!
//! Demo entry point: drives the current thread's loop with a heartbeat timer,
//! worker threads that hand work to it, and an optional stdin watcher.

mod cli;

use std::io::{self, BufRead};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tidewater_runloop::{registry, LoopHandle, RunLoopConfig, RunLoopMode, Watcher};

use cli::{Cli, Commands};

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_ansi(true))
            .init();
    }
}

fn load_config(path: &Path) -> Result<RunLoopConfig, Box<dyn std::error::Error>> {
    if path.exists() {
        info!("Loading configuration from {}", path.display());
        Ok(RunLoopConfig::load(path)?)
    } else {
        info!("No configuration at {}, using defaults", path.display());
        Ok(RunLoopConfig::default())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(&cli.config)?;

    match cli.command.unwrap_or_else(Commands::default_run) {
        Commands::Run {
            duration_secs,
            heartbeat_ms,
            workers,
            watch_stdin,
        } => run_demo(
            config,
            Duration::from_secs(duration_secs),
            Duration::from_millis(heartbeat_ms.max(1)),
            workers,
            watch_stdin,
        ),
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run_demo(
    config: RunLoopConfig,
    duration: Duration,
    heartbeat: Duration,
    workers: usize,
    watch_stdin: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let handle = registry::install(config)?;

    registry::with_current(|scheduler| {
        let mut beats = 0u64;
        scheduler.add_timer(RunLoopMode::Default, heartbeat, heartbeat, move |cx| {
            beats += 1;
            info!("Heartbeat {} in mode {}", beats, cx.mode());
        });

        if watch_stdin {
            // Lines already buffered by a previous read wait for the next
            // readiness edge.
            scheduler.add_watcher(
                RunLoopMode::Default,
                Watcher::readable(&io::stdin(), move |cx, _| {
                    let mut line = String::new();
                    match io::stdin().lock().read_line(&mut line) {
                        Ok(0) => {
                            info!("stdin closed, stopping");
                            cx.stop();
                        }
                        Ok(_) => info!("stdin: {}", line.trim_end()),
                        Err(e) => warn!("stdin read failed: {}", e),
                    }
                }),
            );
        }
    })?;

    let worker_threads: Vec<_> = (0..workers)
        .map(|id| {
            let handle = handle.clone();
            thread::spawn(move || worker(id, handle))
        })
        .collect();

    let deadline = Instant::now() + duration;
    let result = registry::with_current(|scheduler| scheduler.run_until(RunLoopMode::Default, deadline))?;
    match result {
        Ok(outcome) => info!("Run loop returned {:?}", outcome),
        Err(e) => error!("Run loop failed: {}", e),
    }

    // Releases any worker still blocked on the loop.
    registry::teardown()?;
    for thread in worker_threads {
        if thread.join().is_err() {
            warn!("Worker thread panicked");
        }
    }

    println!("{}", serde_json::to_string_pretty(&handle.metrics().snapshot())?);
    Ok(())
}

fn worker(id: usize, handle: LoopHandle) {
    for round in 0.. {
        let started = Instant::now();
        let result = handle.perform_and_wait(
            &[RunLoopMode::Default],
            move |cx| info!("Worker {} round {} ran at {:?}", id, round, cx.now()),
            None,
        );
        match result {
            Ok(()) => info!("Worker {} round {} done in {:?}", id, round, started.elapsed()),
            Err(e) => {
                warn!("Worker {} stopping: {}", id, e);
                return;
            }
        }
        thread::sleep(Duration::from_millis(300 + 100 * id as u64));
    }
}
