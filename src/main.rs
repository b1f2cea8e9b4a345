use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use mapred_lite::artifact::Artifact;
use mapred_lite::config::{ClusterConfig, NetConfig, TimingConfig};
use mapred_lite::error::{MapredError, Result};
use mapred_lite::shutdown::install_shutdown_handler;
use mapred_lite::sim::{RunReport, SimCluster};
use mapred_lite::NodeId;

#[derive(Parser, Debug)]
#[command(name = "mapred-lite")]
#[command(version)]
#[command(about = "A Raft-coordinated map/reduce cluster simulator")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a simulated cluster until the job completes
    Run(RunArgs),

    /// Generate synthetic input documents for a run
    GenInputs(GenInputsArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Number of master nodes
    #[arg(long, default_value = "5")]
    masters: u32,

    /// Number of worker nodes
    #[arg(long, default_value = "7")]
    workers: u32,

    /// Number of map tasks (ignored when --input-dir is given; the input
    /// file count decides)
    #[arg(long, default_value = "5")]
    map_tasks: usize,

    /// Number of reduce tasks
    #[arg(long, default_value = "10")]
    reduce_tasks: usize,

    /// Directory of *.txt input documents, one per map task
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// RNG seed; the same seed replays the same run
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Simulated milliseconds per step
    #[arg(long, default_value = "5")]
    tick_ms: u64,

    /// Give up after this much simulated time
    #[arg(long, default_value = "60000")]
    max_sim_ms: u64,

    /// Probability that any message is lost in transit
    #[arg(long, default_value = "0.0")]
    drop_rate: f64,

    /// Crash the current leader after this much simulated time
    #[arg(long)]
    crash_leader_after_ms: Option<u64>,

    /// Restart the crashed node this much simulated time after the crash
    #[arg(long, requires = "crash_leader_after_ms")]
    restart_after_ms: Option<u64>,

    /// Run as fast as possible instead of pacing to real time
    #[arg(long)]
    fast: bool,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct GenInputsArgs {
    /// Output directory
    #[arg(long, default_value = "inputs")]
    dir: PathBuf,

    /// Number of documents to generate
    #[arg(long, default_value = "5")]
    count: usize,

    /// Words per document
    #[arg(long, default_value = "500")]
    words: usize,

    /// RNG seed
    #[arg(long, default_value = "42")]
    seed: u64,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

const VOCABULARY: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "raft", "leader", "follower",
    "candidate", "term", "vote", "heartbeat", "task", "map", "reduce", "worker", "master",
    "cluster", "message", "timeout", "election", "quorum", "partition", "crash", "restart",
    "artifact", "bitmap", "phase", "barrier", "gossip", "replica", "progress", "count",
];

async fn load_inputs(dir: &PathBuf) -> Result<Vec<Artifact>> {
    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "txt") {
            paths.push(path);
        }
    }
    paths.sort();

    if paths.is_empty() {
        return Err(MapredError::InvalidConfig(format!(
            "no *.txt input files found in {}",
            dir.display()
        )));
    }

    let mut inputs = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let data = tokio::fs::read_to_string(&path).await?;
        inputs.push(Artifact::new(name, data));
    }
    Ok(inputs)
}

fn synthesize_inputs(count: usize, words_each: usize, seed: u64) -> Vec<Artifact> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let words: Vec<&str> = (0..words_each)
                .map(|_| VOCABULARY[rng.gen_range(0..VOCABULARY.len())])
                .collect();
            Artifact::new(format!("pg-{:02}.txt", i), words.join(" "))
        })
        .collect()
}

async fn run(args: RunArgs) -> Result<()> {
    let inputs = match &args.input_dir {
        Some(dir) => load_inputs(dir).await?,
        None => synthesize_inputs(args.map_tasks, 500, args.seed),
    };

    let config = ClusterConfig::new(args.masters, args.workers, inputs.len(), args.reduce_tasks)?;
    let timing = TimingConfig::default();
    let net = NetConfig::default().with_drop_rate(args.drop_rate);

    tracing::info!(
        masters = config.master_count,
        workers = config.worker_count,
        map_tasks = config.map_task_count,
        reduce_tasks = config.reduce_task_count,
        seed = args.seed,
        drop_rate = args.drop_rate,
        "Starting simulated cluster"
    );

    let mut sim = SimCluster::new(config, timing, net, args.seed, inputs)?;
    let shutdown = install_shutdown_handler();
    let tick = Duration::from_millis(args.tick_ms);
    let max = Duration::from_millis(args.max_sim_ms);

    let mut crashed_leader: Option<NodeId> = None;
    let mut restart_at: Option<Duration> = None;

    while sim.now() < max && !sim.job_complete() {
        if let Some(after) = args.crash_leader_after_ms {
            if crashed_leader.is_none() && sim.now() >= Duration::from_millis(after) {
                if let Some(leader) = sim.leader_id() {
                    sim.crash(leader);
                    crashed_leader = Some(leader);
                    restart_at = args
                        .restart_after_ms
                        .map(|ms| sim.now() + Duration::from_millis(ms));
                }
            }
        }
        if let (Some(at), Some(id)) = (restart_at, crashed_leader) {
            if sim.now() >= at {
                sim.restart(id);
                restart_at = None;
            }
        }

        sim.step(tick);

        if args.fast {
            if shutdown.is_cancelled() {
                break;
            }
        } else {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(tick) => {}
            }
        }
    }

    let report = sim.report();
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Run Report");
    println!("{}", "=".repeat(48));
    println!(
        "Finished:       {}",
        if report.finished { "yes" } else { "no (gave up)" }
    );
    println!("Simulated time: {} ms", report.sim_elapsed_ms);
    match (report.leader_id, report.term) {
        (Some(id), Some(term)) => println!("Leader:         Node {} (term {})", id, term),
        _ => println!("Leader:         none"),
    }
    println!(
        "Workers:        {}/{} retired",
        report.workers_retired, report.worker_count
    );
    println!();
    println!("Masters:");
    println!("{:<6} {:<11} {:<6} COMPLETED", "ID", "ROLE", "TERM");
    println!("{}", "-".repeat(36));
    for master in &report.masters {
        println!(
            "{:<6} {:<11} {:<6} {}",
            master.node_id, master.role, master.term, master.completed
        );
    }
    println!();
    println!(
        "Transport:      sent={} delivered={} dropped={}",
        report.transport.sent, report.transport.delivered, report.transport.dropped
    );
}

async fn gen_inputs(args: GenInputsArgs) -> Result<()> {
    tokio::fs::create_dir_all(&args.dir).await?;
    let inputs = synthesize_inputs(args.count, args.words, args.seed);
    for artifact in &inputs {
        let path = args.dir.join(&artifact.name);
        tokio::fs::write(&path, &artifact.data).await?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Run(run_args) => run(run_args).await?,
        Commands::GenInputs(gen_args) => gen_inputs(gen_args).await?,
    }
    Ok(())
}
