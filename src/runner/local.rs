use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::args::SpawnRate;
use crate::error::AppResult;
use crate::pool::UserPool;
use crate::shutdown::ShutdownReceiver;
use crate::spawn::{ClassCounts, format_counts, total_count};
use crate::stats::{RequestStats, StatsInbox, StatsSink, StatsView, stats_channel};
use crate::users::{UserClassSet, UserClassSpec};

use super::hooks::{Hooks, NodeRole};
use super::ramp::{RAMP_TICK, Ramp, RampProgress};
use super::shape::{SHAPE_TICK_INTERVAL, ShapeController, ShapeUpdate};
use super::state::RunState;
use super::{
    RunnerSettings, StopReason, announce_target, log_run_time, log_shutdown, publish_all,
    resolve_exit_code, sleep_until_opt,
};

const ROLE: NodeRole = NodeRole::Local;

/// Runs every user in this process.
pub struct LocalRunner {
    settings: RunnerSettings,
    specs: Vec<UserClassSpec>,
    pool: UserPool,
    inbox: StatsInbox,
    stats: RequestStats,
    sinks: Vec<Box<dyn StatsSink>>,
    hooks: Hooks,
    shape: Option<ShapeController>,
    ramp: Option<Ramp>,
    state: RunState,
}

impl LocalRunner {
    #[must_use]
    pub fn new(
        settings: RunnerSettings,
        classes: UserClassSet,
        hooks: Hooks,
        shape: Option<ShapeController>,
        sinks: Vec<Box<dyn StatsSink>>,
    ) -> Self {
        let (recorder, inbox) = stats_channel();
        let specs = classes.specs();
        let pool = UserPool::new(classes, recorder, settings.host.as_deref());
        Self {
            settings,
            specs,
            pool,
            inbox,
            stats: RequestStats::default(),
            sinks,
            hooks,
            shape,
            ramp: None,
            state: RunState::Init,
        }
    }

    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Runs until the time limit, the shape finishing or an interrupt.
    ///
    /// Returns the process exit code.
    ///
    /// # Errors
    ///
    /// Returns an error when a lifecycle hook fails or asks to exit.
    pub async fn run(mut self, mut shutdown_rx: ShutdownReceiver) -> AppResult<i32> {
        self.hooks.init(ROLE)?;

        let shape_drives_run = self
            .shape
            .as_ref()
            .is_some_and(|shape| !shape.use_common_options());
        let run_time = if shape_drives_run {
            None
        } else {
            self.settings.run_time
        };
        if self.shape.is_none() {
            let distribution =
                announce_target(&self.specs, self.settings.users, self.settings.spawn_rate);
            self.start_ramp(distribution.counts, self.settings.spawn_rate);
        }
        log_run_time(run_time);
        self.hooks.test_start(ROLE)?;

        let started_at = Instant::now();
        let deadline = run_time.and_then(|limit| started_at.checked_add(limit));
        if let Some(shape) = self.shape.as_mut() {
            shape.start(started_at);
        }
        self.state = RunState::Spawning;

        let mut ramp_tick = tokio::time::interval(RAMP_TICK);
        ramp_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shape_tick = tokio::time::interval(SHAPE_TICK_INTERVAL);
        shape_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats_tick = tokio::time::interval(self.settings.stats_interval);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        stats_tick.reset();

        let reason = loop {
            tokio::select! {
                _ = ramp_tick.tick() => {
                    self.advance_ramp()?;
                }
                _ = shape_tick.tick(), if self.shape.is_some() => {
                    if self.apply_shape() {
                        break StopReason::ShapeFinished;
                    }
                }
                () = sleep_until_opt(deadline) => {
                    info!("Time limit reached. Stopping");
                    break StopReason::TimeLimit;
                }
                _ = stats_tick.tick() => {
                    self.publish(false);
                }
                _ = shutdown_rx.recv() => {
                    info!("Exiting due to CTRL+C interruption");
                    break StopReason::Interrupted;
                }
            }
        };

        self.stop(reason).await
    }

    fn start_ramp(&mut self, desired: ClassCounts, rate: SpawnRate) {
        let order = self.specs.iter().map(|spec| spec.name.clone()).collect();
        self.ramp = Some(Ramp::new(desired, order, rate, Instant::now()));
        self.state = RunState::Spawning;
    }

    fn advance_ramp(&mut self) -> AppResult<()> {
        let Some(ramp) = self.ramp.as_mut() else {
            return Ok(());
        };
        if ramp.advance(&mut self.pool, Instant::now())? == RampProgress::Spawning {
            return Ok(());
        }
        let counts = self.pool.running_counts();
        info!(
            "All users spawned: {} ({} total users)",
            format_counts(&counts),
            total_count(&counts)
        );
        self.ramp = None;
        self.state = RunState::Running;
        self.hooks.spawning_complete(ROLE, &counts);
        Ok(())
    }

    /// Returns true when the shape asked to stop.
    fn apply_shape(&mut self) -> bool {
        let Some(shape) = self.shape.as_mut() else {
            return false;
        };
        match shape.tick(Instant::now()) {
            ShapeUpdate::Unchanged => false,
            ShapeUpdate::Stop => true,
            ShapeUpdate::Target { users, spawn_rate } => {
                let distribution = announce_target(&self.specs, users, spawn_rate);
                self.start_ramp(distribution.counts, spawn_rate);
                false
            }
        }
    }

    fn publish(&mut self, is_final: bool) {
        self.stats.drain(&mut self.inbox);
        self.pool.reap();
        let view = StatsView {
            state: self.state,
            user_count: self.pool.user_count(),
            stats: &self.stats,
            is_final,
        };
        publish_all(&mut self.sinks, &view);
    }

    async fn stop(mut self, reason: StopReason) -> AppResult<i32> {
        debug!("Stopping local run: {:?}", reason);
        self.state = RunState::Stopping;
        self.ramp = None;
        self.hooks.stopping(ROLE);
        self.pool
            .stop_all(true, self.settings.stop_timeout)
            .await;
        self.state = RunState::Stopped;
        self.publish(true);

        self.state = RunState::Quitting;
        let exit_code = resolve_exit_code(
            self.stats.has_failures(),
            self.settings.exit_code_on_error,
            &self.hooks,
            ROLE,
        );
        log_shutdown(exit_code);
        Ok(exit_code)
    }
}
