#![allow(clippy::print_stdout)]

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sync_replay::config::ReplayConfig;
use sync_replay::replay::{replay_reader, store_snapshot};
use tracing_subscriber::EnvFilter;

/// Replays recorded dashboard socket frames through the entity sync pipeline
/// and prints a JSON report.
#[derive(Parser, Debug)]
struct Args {
    /// Recorded frames, one per line. Reads stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,
    /// Local actor id; overrides ENTITY_SYNC_LOCAL_ACTOR_ID.
    #[arg(long)]
    actor: Option<String>,
    /// Dedup window in milliseconds; overrides ENTITY_SYNC_DEDUP_WINDOW_MS.
    #[arg(long)]
    dedup_window_ms: Option<u64>,
    /// Per-workflow execution list cap; overrides ENTITY_SYNC_WORKFLOW_EXECUTION_CAP.
    #[arg(long)]
    workflow_execution_cap: Option<usize>,
    /// Disable self-echo suppression.
    #[arg(long)]
    no_echo_filter: bool,
    /// Also print the final store contents.
    #[arg(long)]
    dump_store: bool,
}

fn main() -> Result<()> {
    let config = ReplayConfig::from_env().context("load replay configuration")?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str())),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut sync = config.sync;
    if let Some(actor) = args.actor {
        sync.local_actor_id = Some(actor);
    }
    if let Some(dedup_window_ms) = args.dedup_window_ms {
        sync.dedup_window_ms = dedup_window_ms;
    }
    if let Some(cap) = args.workflow_execution_cap {
        sync.workflow_execution_cap = cap;
    }
    if args.no_echo_filter {
        sync.suppress_self_echo = false;
    }

    let outcome = match &args.input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("open recorded stream {}", path.display()))?;
            replay_reader(BufReader::new(file), &path.display().to_string(), sync)
                .with_context(|| format!("replay {}", path.display()))?
        }
        None => replay_reader(io::stdin().lock(), "stdin", sync).context("replay stdin")?,
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&outcome.report).context("encode replay report")?
    );
    if args.dump_store {
        println!(
            "{}",
            serde_json::to_string_pretty(&store_snapshot(&outcome.store))
                .context("encode store snapshot")?
        );
    }
    Ok(())
}
