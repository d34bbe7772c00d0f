//! Run lifecycle for the three node roles: local, master and worker.
mod cpu;
mod hooks;
mod local;
mod master;
mod ramp;
mod shape;
mod state;
mod worker;


use std::time::Duration;

use tracing::{info, warn};

use crate::args::SpawnRate;
use crate::heartbeat::HeartbeatSettings;
use crate::spawn::{Distribution, distribute};
use crate::stats::{StatsSink, StatsView};
use crate::users::{TagFilter, UserClassSpec};

pub use cpu::{CPU_WARNING_THRESHOLD_X100, CpuMonitor, format_percent_x100};
pub use hooks::{ConfigHooks, HookAction, Hooks, NodeRole, RunHook};
pub use local::LocalRunner;
pub use master::{MasterRunner, MasterSettings};
pub use ramp::{RAMP_TICK, Ramp, RampProgress, distance};
pub use shape::{
    LoadShape, SHAPE_TICK_INTERVAL, ShapeController, ShapeTick, ShapeUpdate, StagesShape,
    ignored_option_warnings,
};
pub use state::RunState;
pub use worker::WorkerRunner;

/// Users started when no count was configured.
pub const DEFAULT_USERS: u64 = 1;

/// Options shared by every runner.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub users: u64,
    pub spawn_rate: SpawnRate,
    pub run_time: Option<Duration>,
    pub stop_timeout: Duration,
    pub host: Option<String>,
    pub tags: TagFilter,
    pub exit_code_on_error: i32,
    pub stats_interval: Duration,
    pub heartbeat: HeartbeatSettings,
    pub worker_report_wait: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            users: DEFAULT_USERS,
            spawn_rate: SpawnRate::ONE,
            run_time: None,
            stop_timeout: Duration::ZERO,
            host: None,
            tags: TagFilter::default(),
            exit_code_on_error: 1,
            stats_interval: Duration::from_secs(2),
            heartbeat: HeartbeatSettings::default(),
            worker_report_wait: Duration::from_secs(30),
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopReason {
    TimeLimit,
    ShapeFinished,
    Interrupted,
    LastWorkerQuit,
    Requested,
}

/// Per-class target for `users` and logs the ramp, warning on fixed-count overflow.
pub(crate) fn announce_target(
    classes: &[UserClassSpec],
    users: u64,
    spawn_rate: SpawnRate,
) -> Distribution {
    let distribution = distribute(classes, users);
    if let Some(overflow) = distribution.overflow {
        warn!("{}", overflow);
    }
    info!(
        "Ramping to {} users at a rate of {} per second",
        users, spawn_rate
    );
    distribution
}

pub(crate) fn log_run_time(run_time: Option<Duration>) {
    match run_time {
        Some(limit) => info!("Run time limit set to {} seconds", limit.as_secs()),
        None => info!("No run time limit set, use CTRL+C to interrupt"),
    }
}

/// Exit code from recorded failures, after hooks had their say.
pub(crate) fn resolve_exit_code(
    has_failures: bool,
    exit_code_on_error: i32,
    hooks: &Hooks,
    role: NodeRole,
) -> i32 {
    let code = if has_failures { exit_code_on_error } else { 0 };
    hooks.quitting(role, code)
}

pub(crate) fn publish_all(sinks: &mut [Box<dyn StatsSink>], view: &StatsView<'_>) {
    for sink in sinks.iter_mut() {
        sink.publish(view);
    }
}

pub(crate) fn log_shutdown(exit_code: i32) {
    info!("Shutting down (exit code {})", exit_code);
}

/// Future that completes at `deadline`, or never.
pub(crate) async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
