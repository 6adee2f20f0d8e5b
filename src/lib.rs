// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod report;
pub mod stop;
pub mod task;
pub mod types;

use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::engine::{RunOptions, WorkerManager};
use crate::errors::Result;
use crate::report::parsers::fmt_duration;

pub use crate::engine::{Fault, FaultSender, ManagerState, TaskObserver, WorkerManagerConfig};
pub use crate::errors::RunpoolError;
pub use crate::report::{Hook, ReportContext, Reporter, WorkerManagerReporter};
pub use crate::stop::{LiveInfo, StopCondition};
pub use crate::task::{LaunchSpec, Task, TaskSpec, TaskStatus};
pub use crate::types::NonzeroExitHandling;

/// High-level entry point used by `main.rs`.
///
/// Loads the batch file, applies CLI overrides, queues every task and works
/// through them. Ctrl-C aborts the run through the fault channel; after an
/// abort, tasks still running get `--shutdown-grace` to exit before they are
/// killed.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;
    let cfg = apply_overrides(cfg, &args);

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let mut wm = WorkerManager::new(cfg.worker_manager.clone())?;
    if let Some(ref settings) = cfg.reporter {
        wm.attach_reporter(settings.build()?)?;
    }
    for entry in &cfg.tasks {
        wm.add_task(entry.to_spec())?;
    }

    // Ctrl-C -> foreign fault -> abort.
    let faults = wm.fault_sender();
    let ctrl_c = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        info!("received Ctrl+C");
        let _ = faults.send_foreign(anyhow::anyhow!("interrupted by Ctrl+C"));
    });

    let opts = RunOptions {
        forward_streams: cfg.run.forward_streams,
        timeout: cfg.run.timeout,
        stop_conditions: cfg.stop_conditions.clone(),
        ..RunOptions::default()
    };
    let result = wm.start_working(opts).await;
    ctrl_c.abort();

    if result.is_err() {
        if let Err(e) = wm.shutdown(args.shutdown_grace).await {
            warn!(error = %e, "shutdown after abort failed");
        }
    }
    result
}

fn apply_overrides(mut cfg: ConfigFile, args: &CliArgs) -> ConfigFile {
    if let Some(n) = args.num_workers {
        cfg.worker_manager.num_workers = n;
    }
    if let Some(timeout) = args.timeout {
        cfg.run.timeout = Some(timeout);
    }
    if args.forward_streams {
        cfg.run.forward_streams = true;
    }
    cfg
}

fn print_dry_run(cfg: &ConfigFile) {
    let wm = &cfg.worker_manager;
    println!("runpool dry-run");
    println!("  worker_manager.num_workers = {}", wm.num_workers);
    println!("  worker_manager.poll_delay = {}", fmt_duration(wm.poll_delay));
    println!(
        "  worker_manager.nonzero_exit_handling = {}",
        wm.nonzero_exit_handling
    );
    println!("  run.forward_streams = {}", cfg.run.forward_streams);
    match cfg.run.timeout {
        Some(t) => println!("  run.timeout = {}", fmt_duration(t)),
        None => println!("  run.timeout = none"),
    }

    if !cfg.stop_conditions.is_empty() {
        println!();
        println!("stop conditions ({}):", cfg.stop_conditions.len());
        for cond in &cfg.stop_conditions {
            println!("  - {}: {}", cond.name(), cond.description());
        }
    }

    if let Some(ref reporter) = cfg.reporter {
        println!();
        println!("report formats ({}):", reporter.formats.len());
        for fmt in &reporter.formats {
            println!("  - {} ({:?})", fmt.name, fmt.parser);
        }
        for (hook, names) in &reporter.hooks {
            println!("  {hook} -> {}", names.join(", "));
        }
    }

    println!();
    println!("tasks ({}):", cfg.tasks.len());
    for (i, task) in cfg.tasks.iter().enumerate() {
        match task.name {
            Some(ref name) => println!("  - {name}"),
            None => println!("  - #{i}"),
        }
        println!("      cmd: {}", task.launch.display_command());
        if let Some(uid) = task.uid {
            println!("      uid: {uid}");
        }
        if let Some(priority) = task.priority {
            println!("      priority: {priority}");
        }
        if let Some(ref cwd) = task.launch.cwd {
            println!("      cwd: {}", cwd.display());
        }
        if let Some(ref path) = task.launch.save_streams {
            println!("      save_streams: {}", path.display());
        }
    }

    debug!("dry-run complete (no execution)");
}
