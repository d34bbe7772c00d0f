use clap::Parser;
use std::time::Duration;

use super::parsers::{
    parse_positive_time_span, parse_positive_u64, parse_process_count, parse_spawn_rate,
    parse_time_span,
};
use super::types::{LogLevel, PositiveU64, ProcessCount, SpawnRate};

pub(crate) const DEFAULT_MASTER_PORT: u16 = 5557;

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Distributed load generator - weighted virtual users, master/worker coordination, load shapes and multi-process workers."
)]
pub struct HordeArgs {
    /// User classes to run (defaults to every class in the config file)
    #[arg(value_name = "USER_CLASSES")]
    pub user_classes: Vec<String>,

    /// Config file defining user classes and shapes (.toml or .json)
    #[arg(long = "config", short = 'f', env = "HORDE_CONFIG")]
    pub config: Option<String>,

    /// Peak number of concurrent users
    #[arg(long = "users", short = 'u')]
    pub users: Option<u64>,

    /// Users started per second (decimals allowed, e.g. 0.5)
    #[arg(long = "spawn-rate", short = 'r', value_parser = parse_spawn_rate)]
    pub spawn_rate: Option<SpawnRate>,

    /// Stop after this long (e.g. 300s, 20m, 3h, 1h30m)
    #[arg(long = "run-time", short = 't', value_parser = parse_positive_time_span)]
    pub run_time: Option<Duration>,

    /// How long users may finish their current task when stopping
    #[arg(long = "stop-timeout", value_parser = parse_time_span, default_value = "0")]
    pub stop_timeout: Duration,

    /// Run without a UI (always the case; accepted for compatibility)
    #[arg(long = "headless")]
    pub headless: bool,

    /// Base URL for HTTP tasks
    #[arg(long = "host", short = 'H')]
    pub host: Option<String>,

    /// Run as the master node of a distributed test
    #[arg(long = "master", conflicts_with = "worker")]
    pub master: bool,

    /// Run as a worker connecting to a master
    #[arg(long = "worker")]
    pub worker: bool,

    /// Master address workers connect to
    #[arg(long = "master-host", default_value = "127.0.0.1")]
    pub master_host: String,

    /// Master port workers connect to
    #[arg(long = "master-port", default_value_t = DEFAULT_MASTER_PORT)]
    pub master_port: u16,

    /// Interface the master binds to
    #[arg(long = "master-bind-host", default_value = "0.0.0.0")]
    pub master_bind_host: String,

    /// Port the master binds to
    #[arg(long = "master-bind-port", default_value_t = DEFAULT_MASTER_PORT)]
    pub master_bind_port: u16,

    /// Workers the master waits for before starting
    #[arg(long = "expect-workers", default_value_t = 1)]
    pub expect_workers: usize,

    /// Give up if expected workers have not connected within this time
    #[arg(long = "expect-workers-max-wait", value_parser = parse_positive_time_span)]
    pub expect_workers_max_wait: Option<Duration>,

    /// Fork this many worker processes (-1 for one per CPU core)
    #[arg(long = "processes", allow_negative_numbers = true, value_parser = parse_process_count)]
    pub processes: Option<ProcessCount>,

    /// Interval between heartbeats
    #[arg(long = "heartbeat-interval", value_parser = parse_positive_time_span, default_value = "1s")]
    pub heartbeat_interval: Duration,

    /// Missed heartbeat intervals before a worker is marked missing
    #[arg(long = "heartbeat-liveness", value_parser = parse_positive_u64, default_value = "3")]
    pub heartbeat_liveness: PositiveU64,

    /// Worker shuts down after not hearing from the master for this long
    #[arg(long = "master-heartbeat-timeout", value_parser = parse_positive_time_span, default_value = "60s")]
    pub master_heartbeat_timeout: Duration,

    /// Extra time the master waits for worker reports after a ramp
    #[arg(long = "worker-report-wait", value_parser = parse_time_span, default_value = "30s")]
    pub worker_report_wait: Duration,

    /// Only run tasks with any of these tags
    #[arg(long = "tags", short = 'T', num_args = 1..)]
    pub tags: Vec<String>,

    /// Skip tasks with any of these tags
    #[arg(long = "exclude-tags", short = 'E', num_args = 1..)]
    pub exclude_tags: Vec<String>,

    /// Exit code used when any task failed
    #[arg(long = "exit-code-on-error", default_value_t = 1)]
    pub exit_code_on_error: i32,

    /// Load shape to run (required when the config defines several)
    #[arg(long = "shape")]
    pub shape: Option<String>,

    /// Only print the final summary
    #[arg(long = "only-summary")]
    pub only_summary: bool,

    /// Interval between console stats tables
    #[arg(long = "stats-interval", value_parser = parse_positive_time_span, default_value = "2s")]
    pub stats_interval: Duration,

    /// Log level (DEBUG, INFO, WARNING, ERROR, CRITICAL)
    #[arg(long = "loglevel", short = 'L', default_value = "INFO", ignore_case = true)]
    pub loglevel: LogLevel,

    /// Disable ANSI colors in log output
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Set by a supervisor on the worker processes it forks
    #[arg(long = "child-process", hide = true)]
    pub child_process: bool,
}
