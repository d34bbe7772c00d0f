use serde::{Deserialize, Serialize};

use crate::args::SpawnRate;
use crate::config::types::UserClassConfig;
use crate::runner::RunState;
use crate::spawn::ClassCounts;
use crate::stats::StatsSnapshot;
use crate::users::{TagFilter, UserClassSpec};

/// Messages exchanged between the master, its workers and the process
/// supervisor. Encoded as one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Worker announces itself. Re-sent until acknowledged.
    Register(RegisterMessage),
    /// Master accepted a registration and assigned the worker index.
    Ack(AckMessage),
    /// Desired state for the receiving worker.
    Spawn(SpawnMessage),
    Stop,
    Quit(QuitMessage),
    Heartbeat(HeartbeatMessage),
    StatsReport(StatsReportMessage),
    /// Child process finished startup (child stdout to supervisor).
    Ready(ReadyMessage),
}

impl WireMessage {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            WireMessage::Register(_) => "register",
            WireMessage::Ack(_) => "ack",
            WireMessage::Spawn(_) => "spawn",
            WireMessage::Stop => "stop",
            WireMessage::Quit(_) => "quit",
            WireMessage::Heartbeat(_) => "heartbeat",
            WireMessage::StatsReport(_) => "stats_report",
            WireMessage::Ready(_) => "ready",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMessage {
    pub worker_id: String,
    /// Names of the user classes the worker can run.
    pub classes: Vec<String>,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnMessage {
    pub generation: u64,
    pub targets: ClassCounts,
    pub spawn_rate: SpawnRate,
    pub host: Option<String>,
    pub classes: Vec<UserClassSpec>,
    /// Definitions of `classes`; a worker that gets them runs these instead
    /// of its own.
    #[serde(default)]
    pub users: Vec<UserClassConfig>,
    /// `None` when no time limit applies, including shape-driven runs.
    pub run_time_secs: Option<u64>,
    #[serde(default)]
    pub tags: TagFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuitMessage {
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub node_id: String,
    pub state: RunState,
    /// Process CPU usage in hundredths of a percent.
    pub cpu_x100: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsReportMessage {
    pub worker_id: String,
    /// Generation of the last spawn message applied.
    pub generation: u64,
    pub state: RunState,
    pub user_counts: ClassCounts,
    /// Cumulative since the worker started; supersedes earlier reports.
    pub stats: StatsSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyMessage {
    pub pid: u32,
}
