//! Demo/inspection binary: submits synthetic work at every priority level
//! through the real `tokio`-backed host adapter and prints the resulting
//! execution order and queue snapshots, the way a host application would
//! drive the scheduler.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use scheduler_core::{CallbackResult, Priority, Scheduler, SystemClock};
use scheduler_host_tokio::TokioHostAdapter;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Submit a handful of synthetic tasks at each priority level and report
/// the order they actually ran in.
#[derive(Parser, Debug)]
#[command(name = "scheduler-cli", about = "Cooperative priority scheduler demo")]
struct Cli {
    /// Number of tasks to submit per priority level.
    #[arg(long, default_value_t = 2)]
    tasks_per_level: u32,

    /// Delay (ms) applied to every other submitted task, to exercise the
    /// pending queue and timer promotion.
    #[arg(long, default_value_t = 30)]
    stagger_delay_ms: i64,

    /// Override the yield policy's slice length via `force_frame_rate`.
    #[arg(long)]
    frame_rate: Option<i32>,

    /// Print the final queue snapshot as JSON.
    #[arg(long)]
    snapshot: bool,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("scheduler_cli=info,scheduler_core=info");
    let cli = Cli::parse();

    let local = tokio::task::LocalSet::new();
    local.run_until(run(cli)).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let clock = Rc::new(SystemClock::new());
    let adapter = Rc::new(TokioHostAdapter::new(clock.clone()));
    let scheduler = Scheduler::with_clock(adapter, clock);

    if let Some(fps) = cli.frame_rate {
        if let Err(err) = scheduler.force_frame_rate(fps) {
            eprintln!("  ignoring --frame-rate: {err}");
        }
    }

    let order = Rc::new(RefCell::new(Vec::new()));
    let levels = [
        Priority::Immediate,
        Priority::UserBlocking,
        Priority::Normal,
        Priority::Low,
        Priority::Idle,
    ];

    let mut submitted = 0u32;
    for level in levels {
        for i in 0..cli.tasks_per_level {
            let name = format!("{level:?}-{i}");
            let delayed = submitted % 2 == 1;
            let delay = if delayed { Some(cli.stagger_delay_ms) } else { None };
            let order = order.clone();
            let label = name.clone();
            info!(task = %label, ?level, delayed, "submitting task");
            scheduler.schedule_named(
                level,
                scheduler_core::ScheduleOptions { delay },
                label,
                move |_did_timeout| {
                    order.borrow_mut().push(name);
                    CallbackResult::Done
                },
            );
            submitted += 1;
        }
    }

    // Drive enough LocalSet turns for every submitted task (including
    // delayed ones) to have a chance to complete.
    let max_wait = Duration::from_millis((cli.stagger_delay_ms as u64) + 200);
    let deadline = tokio::time::Instant::now() + max_wait;
    while tokio::time::Instant::now() < deadline && order.borrow().len() < submitted as usize {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    println!("execution order:");
    for (i, name) in order.borrow().iter().enumerate() {
        println!("  {:>2}. {name}", i + 1);
    }

    if cli.snapshot {
        let snapshot = scheduler.snapshot();
        println!("\nfinal snapshot:");
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    Ok(())
}
