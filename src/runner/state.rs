use serde::{Deserialize, Serialize};

/// Lifecycle state of a node (local runner, master or worker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    /// Worker registered and idle, or master waiting for workers.
    Waiting,
    Spawning,
    Running,
    Stopping,
    Stopped,
    /// Peer lost: heartbeats stopped arriving.
    Missing,
    Quitting,
}

impl RunState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RunState::Init => "init",
            RunState::Waiting => "waiting",
            RunState::Spawning => "spawning",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Stopped => "stopped",
            RunState::Missing => "missing",
            RunState::Quitting => "quitting",
        }
    }

    /// Whether users are (or are about to be) executing.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, RunState::Spawning | RunState::Running)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
