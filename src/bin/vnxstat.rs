//! vnxstat - block storage performance statistics collector.
//!
//! Runs one collection cycle per invocation: reconciles the array's sampling
//! interval, collects the statistics blobs, and delivers every interval not
//! yet delivered to a zabbix_sender compatible backend. Scheduling is left to
//! cron or a systemd timer.

use tikv_jemallocator::Jemalloc;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;

use clap::Parser;
use tracing::{Level, debug, error, info};
use tracing_subscriber::EnvFilter;

use vnxstat::collector::entity::IgnoreRule;
use vnxstat::collector::{
    CaptureDirService, Collector, CollectorConfig, DEFAULT_KEY_PREFIX, EntityClass, PoolConfig,
    RunReport, SamplingInterval,
};
use vnxstat::sink::{
    CommandSink, DEFAULT_SENDER, DEFAULT_SENDER_CONFIG, DeliveryGate, TelemetrySink, WriterSink,
};
use vnxstat::storage::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};

/// Block storage performance statistics collector.
#[derive(Parser)]
#[command(
    name = "vnxstat",
    about = "Block storage performance statistics collector",
    version
)]
struct Args {
    /// Array serial number. Also used as the host name for the sender.
    #[arg(short, long)]
    array: String,

    /// Directory holding captured management responses, one subdirectory per array.
    #[arg(long, default_value = "./capture")]
    capture_dir: PathBuf,

    /// Directory for delivery checkpoints.
    #[arg(long, default_value = "./checkpoints")]
    checkpoint_dir: PathBuf,

    /// Path to the zabbix_sender binary.
    #[arg(long, default_value = DEFAULT_SENDER)]
    sender: PathBuf,

    /// Agent configuration passed to the sender with -c.
    #[arg(long, default_value = DEFAULT_SENDER_CONFIG)]
    sender_config: PathBuf,

    /// Directory for batch files. Defaults to the system temp directory.
    #[arg(long, value_name = "PATH")]
    batch_dir: Option<PathBuf>,

    /// Expected sampling interval (e.g. "10", "15m", "1h"). Minimum 5 minutes.
    #[arg(short, long, default_value = "10")]
    interval: SamplingInterval,

    /// Entity class to deliver. Repeat to select several. Defaults to all.
    #[arg(short, long = "entity", value_name = "CLASS")]
    entities: Vec<EntityClass>,

    /// Prefix of every metric key.
    #[arg(long, default_value = DEFAULT_KEY_PREFIX)]
    key_prefix: String,

    /// Column to skip, as CLASS:COLUMN. Repeatable.
    #[arg(long = "ignore", value_name = "CLASS:COLUMN")]
    ignores: Vec<IgnoreRule>,

    /// Storage pool to aggregate. Repeatable.
    #[arg(long = "pool", value_name = "POOL")]
    pools: Vec<String>,

    /// Counter summed for each pool. Repeatable. Defaults to the I/O and throughput counters.
    #[arg(long = "pool-metric", value_name = "METRIC")]
    pool_metrics: Vec<String>,

    /// Print batches to stdout instead of running the sender. Checkpoints are not touched.
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON.
    #[arg(long)]
    json: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn collector_config(&self) -> CollectorConfig {
        let mut config = CollectorConfig::new(&self.array);
        config.sampling_interval = self.interval;
        if !self.entities.is_empty() {
            config.entity_classes = self.entities.clone();
        }
        config.key_prefix = self.key_prefix.clone();
        for rule in &self.ignores {
            config.ignore.insert(rule.class, rule.column.clone());
        }
        config.pools = self
            .pools
            .iter()
            .map(|id| {
                let mut pool = PoolConfig::new(id.as_str());
                if !self.pool_metrics.is_empty() {
                    pool.metrics = self.pool_metrics.clone();
                }
                pool
            })
            .collect();
        config
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Logs go to stderr so stdout stays clean for --dry-run and --json output.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("vnxstat={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_report(report: &RunReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(out) => println!("{}", out),
            Err(e) => error!("Failed to serialize run report: {}", e),
        }
        return;
    }
    for batch in &report.batches {
        let outcome = match batch.outcome {
            Some(outcome) => format!("{:?}", outcome),
            None => "empty".to_string(),
        };
        debug!(
            "{}: {} rows, {} samples, {} not applicable, {}",
            batch.scope, batch.rows, batch.samples, batch.not_applicable, outcome
        );
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!(
        "Starting vnxstat for {} (interval: {}, capture: {})",
        args.array,
        args.interval,
        args.capture_dir.display()
    );

    let config = args.collector_config();
    let service = CaptureDirService::new(&args.capture_dir);

    let (checkpoints, sink): (Box<dyn CheckpointStore>, Box<dyn TelemetrySink>) = if args.dry_run
    {
        info!("Dry run: printing batches to stdout");
        (
            Box::new(MemoryCheckpointStore::new()),
            Box::new(WriterSink::new(std::io::stdout())),
        )
    } else {
        let store = match FileCheckpointStore::open(&args.checkpoint_dir) {
            Ok(store) => store,
            Err(e) => {
                error!("Failed to open checkpoint directory: {}", e);
                std::process::exit(1);
            }
        };
        let mut sender = CommandSink::new(&args.sender, &args.sender_config);
        if let Some(dir) = &args.batch_dir {
            sender = sender.with_batch_dir(dir);
        }
        (Box::new(store), Box::new(sender))
    };

    let mut collector = Collector::new(service, DeliveryGate::new(checkpoints, sink), config);
    match collector.run() {
        Ok(report) => print_report(&report, args.json),
        Err(e) => {
            error!("Collection for {} failed: {}", args.array, e);
            std::process::exit(1);
        }
    }
}
