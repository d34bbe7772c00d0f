use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::types::UserClassConfig;
use crate::error::{AppError, AppResult, DistributedError};
use crate::heartbeat::{HeartbeatMonitor, resolve_heartbeat_check_interval};
use crate::pool::UserPool;
use crate::shutdown::ShutdownReceiver;
use crate::spawn::format_counts;
use crate::stats::{RequestStats, StatsInbox, stats_channel};
use crate::transport::{
    HeartbeatMessage, QuitMessage, RegisterMessage, SpawnMessage, StatsReportMessage,
    WireMessage, WorkerEndpoint,
};
use crate::users::{ConfigCatalog, TagFilter, UserCatalog, UserClassSet};

use super::cpu::CpuMonitor;
use super::hooks::{Hooks, NodeRole};
use super::ramp::{RAMP_TICK, Ramp, RampProgress};
use super::state::RunState;
use super::{RunnerSettings, resolve_exit_code};

const ROLE: NodeRole = NodeRole::Worker;
const MASTER_PEER: &str = "master";

enum Flow {
    Continue,
    Exit(i32),
}

/// What happens once the users being stopped are gone.
#[derive(Clone, Copy, PartialEq, Eq)]
enum AfterStop {
    Report,
    Quit,
    /// Quit and tell the master this worker is leaving.
    QuitLocally,
}

/// Runs the users a master assigns to this process.
pub struct WorkerRunner {
    id: String,
    settings: RunnerSettings,
    catalog: Arc<dyn UserCatalog>,
    class_source: Vec<UserClassConfig>,
    endpoint: WorkerEndpoint,
    pool: UserPool,
    drain: Option<JoinHandle<()>>,
    after_stop: AfterStop,
    inbox: StatsInbox,
    stats: RequestStats,
    hooks: Hooks,
    tags: TagFilter,
    host: Option<String>,
    state: RunState,
    index: Option<u64>,
    generation: u64,
    test_started: bool,
    ramp: Option<Ramp>,
    master: HeartbeatMonitor,
    cpu: CpuMonitor,
}

impl WorkerRunner {
    #[must_use]
    pub fn new(
        id: String,
        settings: RunnerSettings,
        catalog: Arc<dyn UserCatalog>,
        classes: UserClassSet,
        hooks: Hooks,
        endpoint: WorkerEndpoint,
    ) -> Self {
        let (recorder, inbox) = stats_channel();
        let pool = UserPool::new(classes, recorder, settings.host.as_deref());
        let master = HeartbeatMonitor::new(settings.heartbeat.master_timeout);
        Self {
            id,
            tags: settings.tags.clone(),
            host: settings.host.clone(),
            settings,
            catalog,
            class_source: Vec::new(),
            endpoint,
            pool,
            drain: None,
            after_stop: AfterStop::Report,
            inbox,
            stats: RequestStats::default(),
            hooks,
            state: RunState::Init,
            index: None,
            generation: 0,
            test_started: false,
            ramp: None,
            master,
            cpu: CpuMonitor::new(),
        }
    }

    /// Worker id as `host-pid`.
    #[must_use]
    pub fn default_id() -> String {
        let host = std::env::var("HOSTNAME")
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "localhost".to_owned());
        format!("{}-{}", host, std::process::id())
    }

    /// Runs until the master says quit, the master is lost or an interrupt.
    ///
    /// Returns the process exit code.
    ///
    /// # Errors
    ///
    /// Returns an error when the master stops answering, the connection
    /// breaks, or a lifecycle hook fails or asks to exit.
    pub async fn run(mut self, mut shutdown_rx: ShutdownReceiver) -> AppResult<i32> {
        self.hooks.init(ROLE)?;
        self.master.record(MASTER_PEER, Instant::now());
        self.send_register()?;

        let interval = self.settings.heartbeat.interval;
        let mut register_tick = tokio::time::interval(interval);
        register_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        register_tick.reset();
        let mut heartbeat_tick = tokio::time::interval(interval);
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut report_tick = tokio::time::interval(interval);
        report_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        report_tick.reset();
        let mut ramp_tick = tokio::time::interval(RAMP_TICK);
        ramp_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut master_check =
            tokio::time::interval(resolve_heartbeat_check_interval(self.master.timeout()));
        master_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut interrupted = false;
        let result = loop {
            tokio::select! {
                message = self.endpoint.recv() => {
                    let Some(message) = message else {
                        self.state = RunState::Missing;
                        break Err(AppError::distributed(DistributedError::MasterConnectionClosed));
                    };
                    self.master.record(MASTER_PEER, Instant::now());
                    match self.handle_message(message) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Exit(code)) => break Ok(code),
                        Err(err) => break Err(err),
                    }
                }
                () = join_drain(&mut self.drain), if self.drain.is_some() => {
                    self.drain = None;
                    match self.finish_stop() {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Exit(code)) => break Ok(code),
                        Err(err) => break Err(err),
                    }
                }
                _ = register_tick.tick(), if self.index.is_none() => {
                    self.send_register()?;
                }
                _ = heartbeat_tick.tick() => {
                    let cpu_x100 = self.cpu.sample();
                    self.send(WireMessage::Heartbeat(HeartbeatMessage {
                        node_id: self.id.clone(),
                        state: self.state,
                        cpu_x100,
                    }))?;
                }
                _ = report_tick.tick(), if self.index.is_some() => {
                    self.send_report()?;
                }
                _ = ramp_tick.tick(), if self.ramp.is_some() => {
                    self.advance_ramp()?;
                }
                _ = master_check.tick() => {
                    if !self.master.sweep(Instant::now()).is_empty() {
                        self.state = RunState::Missing;
                        break Err(AppError::distributed(DistributedError::MasterHeartbeatTimeout {
                            timeout_secs: self.master.timeout().as_secs(),
                        }));
                    }
                }
                _ = shutdown_rx.recv(), if !interrupted => {
                    info!("Exiting due to CTRL+C interruption");
                    interrupted = true;
                    match self.begin_stop(AfterStop::QuitLocally) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Exit(code)) => break Ok(code),
                        Err(err) => break Err(err),
                    }
                }
            }
        };

        if let Some(drain) = self.drain.take()
            && let Err(err) = drain.await
        {
            warn!("Stopping users failed: {}", err);
        }
        if self.state == RunState::Missing {
            self.pool.stop_all(false, self.settings.stop_timeout).await;
        }
        self.endpoint.close().await;
        result
    }

    fn handle_message(&mut self, message: WireMessage) -> AppResult<Flow> {
        match message {
            WireMessage::Ack(ack) => {
                if self.index != Some(ack.index) {
                    info!("Worker {} registered with index {}", self.id, ack.index);
                }
                self.index = Some(ack.index);
                self.pool.set_worker_index(Some(ack.index));
                if self.state == RunState::Init {
                    self.state = RunState::Waiting;
                }
                Ok(Flow::Continue)
            }
            WireMessage::Spawn(spawn) => {
                self.on_spawn(spawn)?;
                Ok(Flow::Continue)
            }
            WireMessage::Stop => self.begin_stop(AfterStop::Report),
            WireMessage::Quit(_) => {
                info!("Got quit message from master, shutting down...");
                self.begin_stop(AfterStop::Quit)
            }
            WireMessage::Heartbeat(_) => Ok(Flow::Continue),
            WireMessage::Register(_) | WireMessage::StatsReport(_) | WireMessage::Ready(_) => {
                warn!("Unexpected {} message from master", message.kind());
                Ok(Flow::Continue)
            }
        }
    }

    fn on_spawn(&mut self, spawn: SpawnMessage) -> AppResult<()> {
        if spawn.generation <= self.generation {
            debug!(
                "Dropping stale spawn message (generation {} <= {})",
                spawn.generation, self.generation
            );
            return Ok(());
        }
        self.generation = spawn.generation;

        if !self.test_started {
            self.hooks.test_start(ROLE)?;
            self.test_started = true;
        }
        let mut rebuild = spawn.tags != self.tags || spawn.host != self.host;
        if !spawn.users.is_empty() && spawn.users != self.class_source {
            self.catalog = Arc::new(ConfigCatalog::from_config(&spawn.users)?);
            self.class_source = spawn.users;
            info!(
                "Running {} user classes defined by the master",
                self.class_source.len()
            );
            rebuild = true;
        }
        if rebuild {
            let classes = self.catalog.build(&spawn.tags, spawn.host.as_deref())?;
            self.pool.set_classes(classes);
            self.tags = spawn.tags.clone();
            self.host = spawn.host.clone();
        }

        let order = spawn.classes.iter().map(|spec| spec.name.clone()).collect();
        debug!(
            "Spawn generation {}: {} at {} per second",
            spawn.generation,
            format_counts(&spawn.targets),
            spawn.spawn_rate
        );
        self.ramp = Some(Ramp::new(spawn.targets, order, spawn.spawn_rate, Instant::now()));
        self.state = RunState::Spawning;
        self.advance_ramp()
    }

    fn advance_ramp(&mut self) -> AppResult<()> {
        let Some(ramp) = self.ramp.as_mut() else {
            return Ok(());
        };
        if ramp.advance(&mut self.pool, Instant::now())? == RampProgress::Spawning {
            return Ok(());
        }
        self.ramp = None;
        self.state = RunState::Running;
        let counts = self.pool.running_counts();
        self.hooks.spawning_complete(ROLE, &counts);
        self.send_report()
    }

    /// Takes the users out of the pool and lets them wind down in the
    /// background; `next` runs once they are gone.
    fn begin_stop(&mut self, next: AfterStop) -> AppResult<Flow> {
        if next != AfterStop::Report || self.drain.is_none() {
            self.after_stop = next;
        }
        if self.drain.is_some() {
            return Ok(Flow::Continue);
        }
        if matches!(self.state, RunState::Stopped | RunState::Quitting) {
            return self.finish_stop();
        }
        self.ramp = None;
        self.state = RunState::Stopping;
        self.hooks.stopping(ROLE);
        let drain = self.pool.begin_stop();
        self.drain = Some(tokio::spawn(drain.finish(true, self.settings.stop_timeout)));
        Ok(Flow::Continue)
    }

    fn finish_stop(&mut self) -> AppResult<Flow> {
        let next = std::mem::replace(&mut self.after_stop, AfterStop::Report);
        if self.state == RunState::Stopping {
            self.state = RunState::Stopped;
        }
        if next == AfterStop::Report {
            self.send_report()?;
            return Ok(Flow::Continue);
        }
        self.state = RunState::Quitting;
        self.send_report()?;
        if next == AfterStop::QuitLocally {
            self.send(WireMessage::Quit(QuitMessage {
                node_id: self.id.clone(),
            }))?;
        }
        Ok(Flow::Exit(resolve_exit_code(false, 0, &self.hooks, ROLE)))
    }

    fn send_register(&self) -> AppResult<()> {
        self.send(WireMessage::Register(RegisterMessage {
            worker_id: self.id.clone(),
            classes: self.pool.classes().names(),
            pid: std::process::id(),
        }))
    }

    fn send_report(&mut self) -> AppResult<()> {
        self.stats.drain(&mut self.inbox);
        self.pool.reap();
        let stats = self.stats.snapshot()?;
        self.send(WireMessage::StatsReport(StatsReportMessage {
            worker_id: self.id.clone(),
            generation: self.generation,
            state: self.state,
            user_counts: self.pool.running_counts(),
            stats,
        }))
    }

    fn send(&self, message: WireMessage) -> AppResult<()> {
        self.endpoint.send(message).map_err(AppError::distributed)
    }
}

/// Resolves when the running drain is done; pends forever without one.
async fn join_drain(drain: &mut Option<JoinHandle<()>>) {
    match drain.as_mut() {
        Some(handle) => {
            if let Err(err) = handle.await {
                warn!("Stopping users failed: {}", err);
            }
        }
        None => std::future::pending().await,
    }
}
