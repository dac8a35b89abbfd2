//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use migrator_core::{SchedulerConfig, TransitionPolicy, ValidatorConfig, DEFAULT_TOPIC};

/// Migration control server command line arguments.
#[derive(Debug, Parser)]
#[command(name = "migrator-server")]
#[command(about = "Control surface for online table migration")]
pub struct Args {
    /// Address to listen on for HTTP requests.
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Data directory of the source store.
    #[arg(long, default_value = "./data/src")]
    pub src_path: PathBuf,

    /// Data directory of the destination store.
    #[arg(long, default_value = "./data/dst")]
    pub dst_path: PathBuf,

    /// Table being migrated.
    #[arg(short, long, default_value = "records")]
    pub table: String,

    /// Topic inconsistency events are published to.
    #[arg(long, default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// Capacity of the in-process event bus.
    #[arg(long, default_value_t = 1024)]
    pub bus_buffer: usize,

    /// Rows per target-to-base validation batch.
    #[arg(long, default_value_t = 100)]
    pub batch_size: usize,

    /// Deadline (ms) for a single validation lookup.
    #[arg(long, default_value_t = 1_000)]
    pub lookup_timeout_ms: u64,

    /// Deadline (ms) for publishing a single event.
    #[arg(long, default_value_t = 1_000)]
    pub notify_timeout_ms: u64,

    /// Back-to-back scan failures before a pass gives up or backs off.
    #[arg(long, default_value_t = 16)]
    pub max_consecutive_failures: u32,

    /// Reject pattern switches that are not a single step forward.
    #[arg(long)]
    pub forward_only: bool,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on for HTTP requests.
    pub listen_addr: String,
    /// Data directory of the source store.
    pub src_path: PathBuf,
    /// Data directory of the destination store.
    pub dst_path: PathBuf,
    /// Table being migrated.
    pub table: String,
    /// Topic inconsistency events are published to.
    pub topic: String,
    /// Capacity of the in-process event bus.
    pub bus_buffer: usize,
    /// Settings for the scheduler and its validation runs.
    pub scheduler: SchedulerConfig,
}

impl From<&Args> for ServerConfig {
    fn from(args: &Args) -> Self {
        let validator = ValidatorConfig::default()
            .with_batch_size(args.batch_size)
            .with_lookup_timeout(Duration::from_millis(args.lookup_timeout_ms))
            .with_notify_timeout(Duration::from_millis(args.notify_timeout_ms))
            .with_max_consecutive_failures(args.max_consecutive_failures);
        let policy = if args.forward_only {
            TransitionPolicy::ForwardOnly
        } else {
            TransitionPolicy::OperatorTrusted
        };

        Self {
            listen_addr: args.listen.clone(),
            src_path: args.src_path.clone(),
            dst_path: args.dst_path.clone(),
            table: args.table.clone(),
            topic: args.topic.clone(),
            bus_buffer: args.bus_buffer.max(1),
            scheduler: SchedulerConfig::default()
                .with_validator(validator)
                .with_transition_policy(policy),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            src_path: PathBuf::from("./data/src"),
            dst_path: PathBuf::from("./data/dst"),
            table: "records".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            bus_buffer: 1024,
            scheduler: SchedulerConfig::default(),
        }
    }
}
