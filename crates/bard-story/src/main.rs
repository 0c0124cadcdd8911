//! bard - synthesize, inspect and replay heap call logs

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};

use bard_core::{EventKind, SimulatedBackdrop};
use bard_logging::{BardSubscriberBuilder, LogConfig};
use bard_storage::{read_log, write_log};
use bard_story::{
    DependencyGraph, PlayOrder, RunReport, StatsCollector, StatsSnapshot, StoryConfig,
    StoryState, StoryTeller, SynthConfig, synth,
};

#[derive(Parser)]
#[command(
    name = "bard",
    about = "Record/replay tooling for heap allocator call traces",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use pretty console output instead of JSONL
    #[arg(long, global = true)]
    pretty: bool,

    /// Also write JSONL logs to daily rotated files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a synthetic trace
    Synth {
        /// Output log file
        out: PathBuf,

        /// Approximate number of events
        #[arg(short, long, default_value = "10000")]
        events: usize,

        /// Random seed
        #[arg(short, long, default_value = "0")]
        seed: u64,

        /// Private heaps besides the process heap
        #[arg(long, default_value = "2")]
        heaps: usize,
    },

    /// Print a summary of a log
    Inspect {
        /// Log file
        log: PathBuf,
    },

    /// Replay a log against the simulated backdrop
    Play {
        /// Log file
        log: PathBuf,

        /// Play order
        #[arg(short, long, value_enum, default_value = "capture")]
        order: OrderArg,

        /// Seed for the shuffled order
        #[arg(short, long, default_value = "0")]
        seed: u64,

        /// Abort on the first unresolved handle
        #[arg(long)]
        strict: bool,

        /// Abort after this many failed events
        #[arg(long)]
        max_failures: Option<u64>,

        /// Story configuration as JSON; flags override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of runs, each against a fresh backdrop
        #[arg(short, long, default_value = "1")]
        repeat: u32,

        /// Make every n-th backdrop call fail
        #[arg(long)]
        fail_every: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Capture,
    Shuffled,
}

#[derive(Serialize)]
struct PlaySummary {
    runs: Vec<RunReport>,
    stats: StatsSnapshot,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = if cli.pretty {
        LogConfig::development()
    } else {
        LogConfig::default()
    };
    if let Some(dir) = &cli.log_dir {
        config = config.with_file_output(dir);
    }
    let _guard = BardSubscriberBuilder::new()
        .with_config(config)
        .with_level(if cli.verbose { "debug" } else { "info" })
        .init()?;

    match cli.command {
        Commands::Synth {
            out,
            events,
            seed,
            heaps,
        } => {
            let log = synth::synthesize(
                SynthConfig::default()
                    .with_events(events)
                    .with_seed(seed)
                    .with_private_heaps(heaps),
            );
            write_log(&out, &log)
                .await
                .with_context(|| format!("writing {}", out.display()))?;
            println!("Wrote {} events to {}", log.len(), out.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Inspect { log } => inspect(&log).await,
        Commands::Play {
            log,
            order,
            seed,
            strict,
            max_failures,
            config,
            repeat,
            fail_every,
        } => {
            let mut story_config = match config {
                Some(path) => load_config(&path).await?,
                None => StoryConfig::default(),
            };
            if strict {
                story_config.policy.strict_handles = true;
            }
            if max_failures.is_some() {
                story_config.policy.max_failures = max_failures;
            }

            let order = match order {
                OrderArg::Capture => PlayOrder::Capture,
                OrderArg::Shuffled => PlayOrder::Shuffled { seed },
            };
            play(&log, story_config, order, repeat, fail_every).await
        }
    }
}

async fn load_config(path: &Path) -> anyhow::Result<StoryConfig> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

async fn inspect(path: &Path) -> anyhow::Result<ExitCode> {
    let log = read_log(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let graph = DependencyGraph::build(&log);

    println!("version:      {}", log.version());
    println!("events:       {}", log.len());
    println!("dependencies: {}", graph.edge_count());
    for (kind, count) in EventKind::ALL.iter().zip(log.kind_histogram()) {
        if count > 0 {
            println!("  {:<20} {}", kind.name(), count);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn play(
    path: &Path,
    config: StoryConfig,
    order: PlayOrder,
    repeat: u32,
    fail_every: Option<u64>,
) -> anyhow::Result<ExitCode> {
    let mut teller = StoryTeller::open(path, config)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let stats = StatsCollector::new();

    let mut runs = Vec::with_capacity(repeat as usize);
    for run in 0..repeat.max(1) {
        teller.reset();
        let mut backdrop = SimulatedBackdrop::new().with_fail_every(fail_every.unwrap_or(0));
        let report = teller.run(&order, &mut backdrop, &stats)?;
        info!(run, played = report.played, failed = report.failed, "Run finished");
        runs.push(report);
    }

    let aborted = runs
        .iter()
        .filter(|report| report.state != StoryState::Done)
        .count();
    if aborted > 0 {
        warn!(aborted, "Some runs were aborted");
    }

    let summary = PlaySummary {
        runs,
        stats: stats.snapshot(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(if aborted > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}
