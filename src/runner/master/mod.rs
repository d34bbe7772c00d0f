//! The master node: waits for workers, splits the target across them and
//! decides when the run has spawned, stopped and finished.
mod view;


use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::args::SpawnRate;
use crate::config::types::UserClassConfig;
use crate::error::{AppError, AppResult, DistributedError};
use crate::heartbeat::{HeartbeatMonitor, resolve_heartbeat_check_interval};
use crate::shutdown::ShutdownReceiver;
use crate::spawn::{ClassCounts, format_counts, ramp_duration, split_target, total_count};
use crate::stats::{StatsSink, StatsView};
use crate::transport::{
    AckMessage, BusEvent, HeartbeatMessage, MasterEndpoint, QuitMessage, RegisterMessage,
    SELF_ID, SpawnMessage, StatsReportMessage, WireMessage,
};
use crate::users::UserClassSpec;

use super::cpu::{CPU_WARNING_THRESHOLD_X100, CpuMonitor, format_percent_x100};
use super::hooks::{Hooks, NodeRole};
use super::ramp::distance;
use super::shape::{SHAPE_TICK_INTERVAL, ShapeController, ShapeUpdate};
use super::state::RunState;
use super::{
    RunnerSettings, StopReason, announce_target, log_run_time, log_shutdown, publish_all,
    resolve_exit_code, sleep_until_opt,
};

use view::WorkerTable;

const ROLE: NodeRole = NodeRole::Master;
/// Node id the master uses in its own messages.
const MASTER_ID: &str = "master";
const WAIT_LOG_INTERVAL: Duration = Duration::from_secs(1);
/// Extra time, beyond the stop timeout, workers get to confirm they stopped.
const STOP_ACK_GRACE: Duration = Duration::from_secs(5);

/// Options only the master uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterSettings {
    pub expect_workers: usize,
    /// `None` waits until interrupted.
    pub expect_workers_max_wait: Option<Duration>,
}

impl Default for MasterSettings {
    fn default() -> Self {
        Self {
            expect_workers: 1,
            expect_workers_max_wait: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Target {
    counts: ClassCounts,
    users: u64,
    spawn_rate: SpawnRate,
}

enum Flow {
    Continue,
    Stop(StopReason),
}

/// Coordinates the workers of a distributed run.
pub struct MasterRunner {
    settings: RunnerSettings,
    master: MasterSettings,
    specs: Vec<UserClassSpec>,
    class_source: Vec<UserClassConfig>,
    endpoint: MasterEndpoint,
    hooks: Hooks,
    shape: Option<ShapeController>,
    sinks: Vec<Box<dyn StatsSink>>,
    workers: WorkerTable,
    monitor: HeartbeatMonitor,
    cpu: CpuMonitor,
    state: RunState,
    generation: u64,
    target: Option<Target>,
    /// Time limit in force; `None` while a shape drives the run.
    run_time: Option<Duration>,
    completion_deadline: Option<Instant>,
}

impl MasterRunner {
    #[must_use]
    pub fn new(
        settings: RunnerSettings,
        master: MasterSettings,
        specs: Vec<UserClassSpec>,
        hooks: Hooks,
        shape: Option<ShapeController>,
        sinks: Vec<Box<dyn StatsSink>>,
        endpoint: MasterEndpoint,
    ) -> Self {
        let monitor = HeartbeatMonitor::new(settings.heartbeat.worker_timeout());
        Self {
            settings,
            master,
            specs,
            class_source: Vec::new(),
            endpoint,
            hooks,
            shape,
            sinks,
            workers: WorkerTable::default(),
            monitor,
            cpu: CpuMonitor::new(),
            state: RunState::Init,
            generation: 0,
            target: None,
            run_time: None,
            completion_deadline: None,
        }
    }

    /// Sends these class definitions with every spawn message, so workers
    /// run the master's classes instead of their own.
    #[must_use]
    pub fn with_class_source(mut self, users: Vec<UserClassConfig>) -> Self {
        self.class_source = users
            .into_iter()
            .filter(|user| self.specs.iter().any(|spec| spec.name == user.name))
            .collect();
        self
    }

    /// Runs the distributed test and returns the process exit code.
    ///
    /// # Errors
    ///
    /// Returns an error when the expected workers never connect, or a
    /// lifecycle hook fails or asks to exit.
    pub async fn run(mut self, mut shutdown_rx: ShutdownReceiver) -> AppResult<i32> {
        let result = self.drive(&mut shutdown_rx).await;
        if result.is_err() {
            self.endpoint.publish(&quit_message());
        }
        self.endpoint.close().await;
        result
    }

    async fn drive(&mut self, shutdown_rx: &mut ShutdownReceiver) -> AppResult<i32> {
        self.hooks.init(ROLE)?;
        self.state = RunState::Waiting;
        if !self.await_workers(shutdown_rx).await? {
            return self.stop(StopReason::Interrupted).await;
        }

        let shape_drives_run = self
            .shape
            .as_ref()
            .is_some_and(|shape| !shape.use_common_options());
        let run_time = if shape_drives_run {
            None
        } else {
            self.settings.run_time
        };
        log_run_time(run_time);
        self.run_time = run_time;
        self.hooks.test_start(ROLE)?;

        let started_at = Instant::now();
        let mut deadline = run_time.and_then(|limit| started_at.checked_add(limit));
        if let Some(shape) = self.shape.as_mut() {
            shape.start(started_at);
        } else {
            self.set_target(self.settings.users, self.settings.spawn_rate);
        }

        let mut heartbeat_tick = tokio::time::interval(self.settings.heartbeat.interval);
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep_tick =
            tokio::time::interval(resolve_heartbeat_check_interval(self.monitor.timeout()));
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shape_tick = tokio::time::interval(SHAPE_TICK_INTERVAL);
        shape_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats_tick = tokio::time::interval(self.settings.stats_interval);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        stats_tick.reset();

        let reason = loop {
            tokio::select! {
                event = self.endpoint.recv() => {
                    let Some(event) = event else {
                        break StopReason::Requested;
                    };
                    if let Flow::Stop(reason) = self.handle_event(event)? {
                        break reason;
                    }
                }
                _ = heartbeat_tick.tick() => {
                    self.send_heartbeat();
                }
                _ = sweep_tick.tick() => {
                    if let Flow::Stop(reason) = self.sweep_workers() {
                        break reason;
                    }
                }
                _ = shape_tick.tick(), if self.shape.is_some() => {
                    self.apply_shape();
                }
                () = sleep_until_opt(deadline) => {
                    info!("Time limit reached. Stopping");
                    deadline = None;
                    self.endpoint.deliver_to_self(WireMessage::Stop);
                }
                () = sleep_until_opt(self.completion_deadline) => {
                    self.on_completion_deadline();
                }
                _ = stats_tick.tick() => {
                    self.publish(false)?;
                }
                _ = shutdown_rx.recv() => {
                    info!("Exiting due to CTRL+C interruption");
                    break StopReason::Interrupted;
                }
            }
        };

        self.stop(reason).await
    }

    /// Waits for the expected number of workers.
    ///
    /// Returns false when interrupted before they arrived.
    async fn await_workers(&mut self, shutdown_rx: &mut ShutdownReceiver) -> AppResult<bool> {
        let expected = self.master.expect_workers;
        if expected == 0 {
            return Ok(true);
        }
        let deadline = self
            .master
            .expect_workers_max_wait
            .and_then(|wait| Instant::now().checked_add(wait));
        let mut log_tick = tokio::time::interval(WAIT_LOG_INTERVAL);
        log_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat_tick = tokio::time::interval(self.settings.heartbeat.interval);
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let connected = self.workers.active_count();
            if connected >= expected {
                return Ok(true);
            }
            tokio::select! {
                event = self.endpoint.recv() => {
                    if let Some(event) = event
                        && let Flow::Stop(_) = self.handle_event(event)?
                    {
                        return Ok(false);
                    }
                }
                _ = log_tick.tick() => {
                    info!(
                        "Waiting for workers to be ready, {} of {} connected",
                        connected, expected
                    );
                }
                _ = heartbeat_tick.tick() => {
                    self.send_heartbeat();
                    self.sweep_workers();
                }
                () = sleep_until_opt(deadline) => {
                    return Err(AppError::distributed(DistributedError::WorkerWaitTimeout {
                        expected,
                        actual: connected,
                    }));
                }
                _ = shutdown_rx.recv() => {
                    info!("Exiting due to CTRL+C interruption");
                    return Ok(false);
                }
            }
        }
    }

    fn handle_event(&mut self, event: BusEvent) -> AppResult<Flow> {
        match event {
            BusEvent::Message { from, message } => match message {
                WireMessage::Register(register) => {
                    self.on_register(register);
                    Ok(Flow::Continue)
                }
                WireMessage::Heartbeat(heartbeat) => {
                    self.on_heartbeat(&from, &heartbeat);
                    Ok(Flow::Continue)
                }
                WireMessage::StatsReport(report) => {
                    self.on_report(&from, report);
                    Ok(Flow::Continue)
                }
                WireMessage::Quit(_) if from != SELF_ID => Ok(self.on_worker_quit(&from)),
                WireMessage::Stop if from == SELF_ID => Ok(Flow::Stop(StopReason::Requested)),
                WireMessage::Quit(_)
                | WireMessage::Stop
                | WireMessage::Ack(_)
                | WireMessage::Spawn(_)
                | WireMessage::Ready(_) => {
                    warn!("Unexpected {} message from {}", message.kind(), from);
                    Ok(Flow::Continue)
                }
            },
            BusEvent::Detached { from } => {
                let Some(view) = self.workers.get_mut(&from) else {
                    return Ok(Flow::Continue);
                };
                if !view.is_active() {
                    return Ok(Flow::Continue);
                }
                warn!("Worker {} disconnected, setting state to missing.", from);
                view.missing = true;
                view.state = RunState::Missing;
                Ok(self.on_workers_lost())
            }
        }
    }

    fn on_register(&mut self, register: RegisterMessage) {
        let worker_id = register.worker_id;
        if self.class_source.is_empty() {
            let missing: Vec<&str> = self
                .specs
                .iter()
                .map(|spec| spec.name.as_str())
                .filter(|name| !register.classes.iter().any(|class| class == name))
                .collect();
            if !missing.is_empty() {
                warn!(
                    "Worker {} cannot run user classes {}, sending it away.",
                    worker_id,
                    missing.join(", ")
                );
                if let Err(err) = self.endpoint.send_to(&worker_id, quit_message()) {
                    debug!("Failed to send quit to worker {}: {}", worker_id, err);
                }
                return;
            }
        }

        let (index, is_new) = self.workers.register(&worker_id);
        self.monitor.record(&worker_id, Instant::now());
        let mut revived = false;
        if let Some(view) = self.workers.get_mut(&worker_id)
            && view.missing
        {
            view.missing = false;
            view.state = RunState::Waiting;
            revived = true;
        }
        if let Err(err) = self
            .endpoint
            .send_to(&worker_id, WireMessage::Ack(AckMessage { index }))
        {
            debug!("Failed to acknowledge worker {}: {}", worker_id, err);
        }
        if is_new {
            info!(
                "Worker {} (index {}) reported as ready. {} workers connected.",
                worker_id,
                index,
                self.workers.active_count()
            );
        }
        if (is_new || revived) && self.state.is_active() {
            self.rebalance();
        }
    }

    fn on_heartbeat(&mut self, from: &str, heartbeat: &HeartbeatMessage) {
        let Some(view) = self.workers.get_mut(from) else {
            debug!("Heartbeat from unknown worker {}", from);
            return;
        };
        self.monitor.record(from, Instant::now());
        view.cpu_x100 = heartbeat.cpu_x100;
        if heartbeat.cpu_x100 > CPU_WARNING_THRESHOLD_X100 && !view.cpu_warned {
            warn!(
                "Worker {} exceeded cpu threshold (actual CPU usage: {}%). Load generation may be throttled.",
                from,
                format_percent_x100(heartbeat.cpu_x100)
            );
            view.cpu_warned = true;
        }
        view.state = heartbeat.state;
        self.revive(from);
    }

    fn on_report(&mut self, from: &str, report: StatsReportMessage) {
        let Some(view) = self.workers.get_mut(from) else {
            debug!("Stats from unknown worker {}", from);
            return;
        };
        self.monitor.record(from, Instant::now());
        view.state = report.state;
        view.user_counts = report.user_counts;
        view.generation = view.generation.max(report.generation);
        view.snapshot = report.stats;
        self.revive(from);
        self.check_completion();
    }

    /// Brings a worker marked missing back into the run once it is heard from.
    fn revive(&mut self, worker_id: &str) {
        let Some(view) = self.workers.get_mut(worker_id) else {
            return;
        };
        if !view.missing {
            return;
        }
        info!("Worker {} is back, setting state to {}", worker_id, view.state);
        view.missing = false;
        if self.state.is_active() {
            self.rebalance();
        }
    }

    fn on_worker_quit(&mut self, worker_id: &str) -> Flow {
        if self.workers.remove(worker_id).is_none() {
            return Flow::Continue;
        }
        self.monitor.forget(worker_id);
        self.endpoint.detach(worker_id);
        info!(
            "Worker {} quit. {} workers connected.",
            worker_id,
            self.workers.active_count()
        );
        self.on_workers_lost()
    }

    fn on_workers_lost(&mut self) -> Flow {
        if !self.state.is_active() {
            return Flow::Continue;
        }
        if self.workers.active_count() == 0 {
            info!("The last worker quit, stopping test.");
            return Flow::Stop(StopReason::LastWorkerQuit);
        }
        self.rebalance();
        Flow::Continue
    }

    fn send_heartbeat(&mut self) {
        let cpu_x100 = self.cpu.sample();
        self.endpoint.publish(&WireMessage::Heartbeat(HeartbeatMessage {
            node_id: MASTER_ID.to_owned(),
            state: self.state,
            cpu_x100,
        }));
    }

    fn sweep_workers(&mut self) -> Flow {
        let now = Instant::now();
        let mut lost = false;
        for worker_id in self.monitor.sweep(now) {
            if let Some(view) = self.workers.get_mut(&worker_id)
                && !view.missing
            {
                warn!(
                    "Worker {} failed to send heartbeat, setting state to missing.",
                    worker_id
                );
                view.missing = true;
                view.state = RunState::Missing;
                lost = true;
            }
        }
        for worker_id in self
            .monitor
            .expired(now, self.settings.heartbeat.missing_grace)
        {
            info!("Removing missing worker {}", worker_id);
            self.workers.remove(&worker_id);
            self.monitor.forget(&worker_id);
            self.endpoint.detach(&worker_id);
        }
        if lost {
            self.on_workers_lost()
        } else {
            Flow::Continue
        }
    }

    fn apply_shape(&mut self) {
        let Some(shape) = self.shape.as_mut() else {
            return;
        };
        match shape.tick(Instant::now()) {
            ShapeUpdate::Unchanged => {}
            ShapeUpdate::Stop => self.endpoint.deliver_to_self(WireMessage::Stop),
            ShapeUpdate::Target { users, spawn_rate } => self.set_target(users, spawn_rate),
        }
    }

    fn set_target(&mut self, users: u64, spawn_rate: SpawnRate) {
        let distribution = announce_target(&self.specs, users, spawn_rate);
        self.target = Some(Target {
            counts: distribution.counts,
            users,
            spawn_rate,
        });
        self.rebalance();
    }

    /// Sends every active worker its share of the target under a new generation.
    fn rebalance(&mut self) {
        let Some(target) = self.target.as_ref() else {
            return;
        };
        self.generation = self.generation.saturating_add(1);
        let active = self.workers.active_indices();
        let indices: Vec<u64> = active.iter().map(|(index, _)| *index).collect();
        let shares = split_target(&self.specs, &target.counts, &indices, target.spawn_rate);
        let run_time_secs = self.run_time.map(|limit| limit.as_secs());
        for share in shares {
            let Some((_, worker_id)) = active.iter().find(|(index, _)| *index == share.index)
            else {
                continue;
            };
            let message = WireMessage::Spawn(SpawnMessage {
                generation: self.generation,
                targets: share.counts,
                spawn_rate: share.spawn_rate,
                host: self.settings.host.clone(),
                classes: self.specs.clone(),
                users: self.class_source.clone(),
                run_time_secs,
                tags: self.settings.tags.clone(),
            });
            if let Err(err) = self.endpoint.send_to(worker_id, message) {
                debug!("Failed to send spawn to worker {}: {}", worker_id, err);
            }
        }
        debug!(
            "Sent spawn generation {} to {} workers",
            self.generation,
            active.len()
        );

        let wait = ramp_duration(target.users, target.spawn_rate)
            .saturating_add(self.settings.worker_report_wait);
        self.completion_deadline = Instant::now().checked_add(wait);
        self.state = RunState::Spawning;
    }

    fn check_completion(&mut self) {
        if self.state != RunState::Spawning {
            return;
        }
        let Some(target) = self.target.as_ref() else {
            return;
        };
        if !self.workers.all_reported(self.generation) {
            return;
        }
        let aggregate = self.workers.aggregate_counts();
        if distance(&aggregate, &target.counts) != 0 {
            return;
        }
        let counts = counts_for_display(&target.counts, &aggregate);
        info!(
            "All users spawned: {} ({} total users)",
            format_counts(&counts),
            total_count(&counts)
        );
        self.mark_running(&counts);
    }

    fn on_completion_deadline(&mut self) {
        self.completion_deadline = None;
        if self.state != RunState::Spawning {
            return;
        }
        let aggregate = self.workers.aggregate_counts();
        let counts = self.target.as_ref().map_or_else(
            || aggregate.clone(),
            |target| counts_for_display(&target.counts, &aggregate),
        );
        warn!(
            "Spawning is complete and report waittime is expired, but not all reports received from workers: {}",
            format_counts(&counts)
        );
        let pending = self.workers.pending(self.generation);
        if !pending.is_empty() {
            debug!("Workers without a report: {}", pending.join(", "));
        }
        self.mark_running(&counts);
    }

    fn mark_running(&mut self, counts: &ClassCounts) {
        self.state = RunState::Running;
        self.completion_deadline = None;
        self.hooks.spawning_complete(ROLE, counts);
    }

    fn publish(&mut self, is_final: bool) -> AppResult<()> {
        let stats = self.workers.merged_stats()?;
        let view = StatsView {
            state: self.state,
            user_count: total_count(&self.workers.aggregate_counts()),
            stats: &stats,
            is_final,
        };
        publish_all(&mut self.sinks, &view);
        Ok(())
    }

    async fn stop(&mut self, reason: StopReason) -> AppResult<i32> {
        debug!("Stopping distributed run: {:?}", reason);
        self.state = RunState::Stopping;
        self.completion_deadline = None;
        self.target = None;
        self.hooks.stopping(ROLE);
        self.endpoint.publish(&WireMessage::Stop);
        self.await_stopped().await?;
        self.endpoint.publish(&quit_message());

        self.state = RunState::Stopped;
        self.publish(true)?;
        self.state = RunState::Quitting;
        let has_failures = self.workers.merged_stats()?.has_failures();
        let exit_code = resolve_exit_code(
            has_failures,
            self.settings.exit_code_on_error,
            &self.hooks,
            ROLE,
        );
        log_shutdown(exit_code);
        Ok(exit_code)
    }

    /// Waits, bounded, for every active worker to report that it stopped.
    async fn await_stopped(&mut self) -> AppResult<()> {
        let wait = self.settings.stop_timeout.saturating_add(STOP_ACK_GRACE);
        let deadline = Instant::now().checked_add(wait);
        while !self.workers.all_stopped() {
            tokio::select! {
                event = self.endpoint.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    match self.handle_event(event)? {
                        Flow::Continue | Flow::Stop(_) => {}
                    }
                }
                () = sleep_until_opt(deadline) => {
                    let running: Vec<String> = self
                        .workers
                        .active()
                        .filter(|view| !matches!(view.state, RunState::Stopped | RunState::Quitting))
                        .map(|view| view.worker_id.clone())
                        .collect();
                    warn!("Timed out waiting for workers to stop: {}", running.join(", "));
                    break;
                }
            }
        }
        Ok(())
    }
}

fn quit_message() -> WireMessage {
    WireMessage::Quit(QuitMessage {
        node_id: MASTER_ID.to_owned(),
    })
}

/// Aggregate counts shown for every target class, zeros included.
fn counts_for_display(target: &ClassCounts, aggregate: &ClassCounts) -> ClassCounts {
    let mut counts: ClassCounts = target
        .keys()
        .map(|name| (name.clone(), aggregate.get(name).copied().unwrap_or(0)))
        .collect();
    for (name, count) in aggregate {
        counts.entry(name.clone()).or_insert(*count);
    }
    counts
}
