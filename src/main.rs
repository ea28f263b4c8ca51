// CLI entry point: pick a policy and a dataset, connect to the node, run the
// propagation job.
//
// Exit codes: 0 on success, -1 when the node is unreachable, -2 for invalid
// arguments, -32 when the start block's state is pruned at the source.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use taint_tracker::chain::{self, ChainSource};
use taint_tracker::config::Config;
use taint_tracker::propagator::{Checkpoint, Propagator};
use taint_tracker::{PolicyKind, TaintPolicy};

#[derive(Debug, Parser)]
#[command(name = "taint-tracker", about = "Replay blocks and propagate a blacklist")]
struct Args {
    /// Taint policy to apply
    #[arg(long, value_enum)]
    policy: PolicyArg,

    /// Index into the configured datasets
    #[arg(long)]
    dataset: usize,

    /// Configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Ignore any existing checkpoint and start fresh
    #[arg(long)]
    no_resume: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    #[value(name = "poison")]
    Poison,
    #[value(name = "haircut")]
    Haircut,
    #[value(name = "fifo")]
    Fifo,
    #[value(name = "seniority")]
    Seniority,
    #[value(name = "reversed_seniority")]
    ReversedSeniority,
}

impl From<PolicyArg> for PolicyKind {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Poison => PolicyKind::Poison,
            PolicyArg::Haircut => PolicyKind::Haircut,
            PolicyArg::Fifo => PolicyKind::Fifo,
            PolicyArg::Seniority => PolicyKind::Seniority,
            PolicyArg::ReversedSeniority => PolicyKind::ReversedSeniority,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let kind: PolicyKind = args.policy.into();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e:#}");
            exit(-2);
        }
    };

    let Some(dataset) = config.datasets.get(args.dataset).cloned() else {
        eprintln!(
            "dataset index {} out of range ({} configured)",
            args.dataset,
            config.datasets.len()
        );
        exit(-2);
    };

    if dataset.block_count == 0 {
        eprintln!("dataset {} has a zero block count", dataset.name);
        exit(-2);
    }

    let data_dir = config.parameters.data_folder.clone();
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("cannot create data folder {}: {e}", data_dir.display());
        exit(-2);
    }

    let policy = TaintPolicy::new(kind);

    // The log file survives resumes and is truncated on fresh starts.
    let stem = format!("{}_{}", dataset.name, kind.name());
    let checkpoint_exists = !args.no_resume
        && matches!(
            Checkpoint::load(&data_dir.join(format!("{stem}_checkpoint.json"))),
            Ok(Some(_))
        );
    let log_path = data_dir.join(format!("{stem}.log"));
    let log_file = match OpenOptions::new()
        .create(true)
        .append(checkpoint_exists)
        .truncate(!checkpoint_exists)
        .write(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("cannot open log file {}: {e}", log_path.display());
            exit(-2);
        }
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .init();

    let chain = match chain::connect_http(&config.parameters.node_url).await {
        Ok(chain) => chain,
        Err(e) => {
            error!("node unreachable at {}: {e:#}", config.parameters.node_url);
            exit(-1);
        }
    };

    match chain.latest_block().await {
        Ok(latest) => info!(latest, "connected to node"),
        Err(e) => {
            error!("node unreachable: {e:#}");
            exit(-1);
        }
    }

    match chain.state_available(dataset.start_block).await {
        Ok(true) => {}
        Ok(false) => {
            error!(
                block = dataset.start_block,
                "start block state is pruned at the source"
            );
            exit(-32);
        }
        Err(e) => {
            error!("node unreachable: {e:#}");
            exit(-1);
        }
    }

    let mut propagator = Propagator::new(chain, policy, dataset.to_job(), data_dir);

    // Finish the current block, checkpoint, then exit.
    let interrupt = propagator.interrupt_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing current block");
            interrupt.store(true, Ordering::Relaxed);
        }
    });

    if let Err(e) = propagator.propagate(!args.no_resume).await {
        error!("propagation failed: {e:#}");
        exit(1);
    }
}
