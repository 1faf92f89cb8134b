// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `csp`: runs the CSP demo routines on a cooperative scheduler.

mod demos;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use csp_rt::{PausePolicy, Scheduler, SchedulerConfig};

// ── CLI ─────────────────────────────────────────────────────────────

/// Cooperative CSP scheduler demos.
#[derive(Parser, Debug)]
#[command(name = "csp", version, about)]
struct Cli {
    /// Scheduler config file (TOML).
    #[arg(long, global = true, env = "CSP_CONFIG")]
    config: Option<PathBuf>,

    /// Time-slice budget in milliseconds; 0 runs the basic variant.
    /// Overrides the config file and CSP_TIME_SLICE_MS.
    #[arg(long, global = true)]
    time_slice_ms: Option<u64>,

    /// Pause policy: park or poll. Overrides the config file and
    /// CSP_PAUSE_POLICY.
    #[arg(long, global = true)]
    policy: Option<PausePolicy>,

    /// Length of every demo sleep, in milliseconds.
    #[arg(long, global = true, env = "CSP_INTERVAL_MS", default_value_t = 1000)]
    interval_ms: u64,

    /// Stop the host loop after this many milliseconds.
    #[arg(long, global = true, env = "CSP_DURATION_MS")]
    duration_ms: Option<u64>,

    /// Print scheduler counters to stderr when the run ends.
    #[arg(long, global = true)]
    stats: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// put 1, put 2, sleep, put 3 against three takes.
    Basic,
    /// Two channels raced with alts.
    Alts,
    /// Ping and pong over one channel.
    PingPong {
        /// Exchanges before both routines end; unbounded when omitted.
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Long-running routine of immediate steps.
    Mixed {
        #[arg(long, default_value_t = 1_000_000)]
        iterations: u64,
    },
    /// basic, alts and an endless ping-pong together.
    All,
}

impl Cli {
    fn scheduler_config(&self) -> anyhow::Result<SchedulerConfig> {
        let mut config = match &self.config {
            Some(path) => SchedulerConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => {
                let mut config = SchedulerConfig::default();
                config.apply_env_overrides()?;
                config
            }
        };
        if let Some(ms) = self.time_slice_ms {
            config.time_slice_ms = ms;
        }
        if let Some(policy) = self.policy {
            config.pause = policy;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
    output::init();

    let cli = Cli::parse();
    let config = cli.scheduler_config()?;
    info!(
        time_slice = ?config.time_slice(),
        pause = ?config.pause,
        "scheduler configured"
    );
    let sched = Scheduler::new(config);
    let interval = Duration::from_millis(cli.interval_ms);

    match &cli.command {
        Command::Basic => demos::basic(&sched, interval),
        Command::Alts => demos::alts_race(&sched),
        Command::PingPong { cycles } => demos::ping_pong(&sched, interval, *cycles),
        Command::Mixed { iterations } => demos::mixed(&sched, *iterations),
        Command::All => {
            demos::basic(&sched, interval);
            demos::alts_race(&sched);
            demos::ping_pong(&sched, interval, None);
        }
    }

    let report = match cli.duration_ms {
        Some(ms) => sched.run_for(Duration::from_millis(ms))?,
        None => sched.run()?,
    };
    debug!(timed_out = report.timed_out, "host loop finished");

    for stalled in &report.stalled {
        output::warning(&format!(
            "routine {} `{}` blocked forever on {}",
            stalled.id, stalled.name, stalled.waiting_on
        ));
    }
    if cli.stats {
        output::stats(report.diagnostics);
    }
    if report.diagnostics.failed > 0 {
        anyhow::bail!("{} routine(s) failed", report.diagnostics.failed);
    }
    Ok(())
}
