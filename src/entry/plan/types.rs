use std::ffi::OsString;
use std::sync::Arc;

use crate::config::types::UserClassConfig;
use crate::runner::{Hooks, MasterSettings, RunnerSettings, ShapeController};
use crate::users::{ConfigCatalog, UserClassSet};

/// Everything a runner needs, validated before any node starts.
pub(in crate::entry) struct RunSetup {
    pub(super) settings: RunnerSettings,
    pub(super) catalog: Arc<ConfigCatalog>,
    pub(super) classes: UserClassSet,
    /// `[[users]]` definitions a master ships to its workers.
    pub(super) class_source: Vec<UserClassConfig>,
    pub(super) hooks: Hooks,
    pub(super) shape: Option<ShapeController>,
    pub(super) only_summary: bool,
}

/// Worker processes forked on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(in crate::entry) struct ChildPlan {
    pub(super) args: Vec<OsString>,
    pub(super) count: usize,
}

pub(in crate::entry) enum RunPlan {
    Local(RunSetup),
    Master {
        setup: RunSetup,
        master: MasterSettings,
        bind_addr: String,
        children: Option<ChildPlan>,
    },
    Worker {
        setup: RunSetup,
        master_addr: String,
        child_process: bool,
    },
    /// Only forks workers that connect to a remote master.
    Supervisor(ChildPlan),
}

impl RunPlan {
    pub(super) const fn mode(&self) -> &'static str {
        match self {
            RunPlan::Local(_) => "local",
            RunPlan::Master { .. } => "master",
            RunPlan::Worker { .. } => "worker",
            RunPlan::Supervisor(_) => "supervisor",
        }
    }
}
