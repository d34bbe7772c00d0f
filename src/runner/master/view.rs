use std::collections::BTreeMap;

use crate::error::DistributedError;
use crate::spawn::ClassCounts;
use crate::stats::{RequestStats, StatsSnapshot};

use crate::runner::RunState;

/// The master's record of one worker.
#[derive(Debug, Clone)]
pub struct WorkerView {
    pub worker_id: String,
    pub index: u64,
    pub state: RunState,
    pub missing: bool,
    pub user_counts: ClassCounts,
    /// Generation of the last spawn message the worker reported applying.
    pub generation: u64,
    pub cpu_x100: u64,
    pub cpu_warned: bool,
    pub snapshot: StatsSnapshot,
}

impl WorkerView {
    /// Counted in target distribution and completion checks.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.missing && !matches!(self.state, RunState::Quitting)
    }
}

/// Every worker known to the master, keyed by worker id.
#[derive(Debug, Clone, Default)]
pub struct WorkerTable {
    workers: BTreeMap<String, WorkerView>,
    /// Last snapshot of workers that have been removed.
    retired: Vec<StatsSnapshot>,
}

impl WorkerTable {
    /// Adds a worker, or returns the existing entry for a repeated registration.
    ///
    /// New workers get the smallest index not held by a current worker.
    pub fn register(&mut self, worker_id: &str) -> (u64, bool) {
        if let Some(view) = self.workers.get(worker_id) {
            return (view.index, false);
        }
        let mut taken: Vec<u64> = self.workers.values().map(|view| view.index).collect();
        taken.sort_unstable();
        let mut index = 0u64;
        for used in taken {
            if used == index {
                index = index.saturating_add(1);
            } else if used > index {
                break;
            }
        }
        self.workers.insert(
            worker_id.to_owned(),
            WorkerView {
                worker_id: worker_id.to_owned(),
                index,
                state: RunState::Waiting,
                missing: false,
                user_counts: ClassCounts::new(),
                generation: 0,
                cpu_x100: 0,
                cpu_warned: false,
                snapshot: StatsSnapshot::default(),
            },
        );
        (index, true)
    }

    #[must_use]
    pub fn get(&self, worker_id: &str) -> Option<&WorkerView> {
        self.workers.get(worker_id)
    }

    pub fn get_mut(&mut self, worker_id: &str) -> Option<&mut WorkerView> {
        self.workers.get_mut(worker_id)
    }

    /// Drops a worker, keeping its last stats for the final report.
    pub fn remove(&mut self, worker_id: &str) -> Option<WorkerView> {
        let view = self.workers.remove(worker_id)?;
        self.retired.push(view.snapshot.clone());
        Some(view)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn active(&self) -> impl Iterator<Item = &WorkerView> {
        self.workers.values().filter(|view| view.is_active())
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// Index to worker id for every active worker.
    #[must_use]
    pub fn active_indices(&self) -> Vec<(u64, String)> {
        self.active()
            .map(|view| (view.index, view.worker_id.clone()))
            .collect()
    }

    /// Summed running counts of the active workers.
    #[must_use]
    pub fn aggregate_counts(&self) -> ClassCounts {
        let mut total = ClassCounts::new();
        for view in self.active() {
            for (name, count) in &view.user_counts {
                let entry = total.entry(name.clone()).or_insert(0);
                *entry = entry.saturating_add(*count);
            }
        }
        total
    }

    /// Whether every active worker has reported on `generation`.
    #[must_use]
    pub fn all_reported(&self, generation: u64) -> bool {
        self.active().all(|view| view.generation >= generation)
    }

    /// Whether every active worker reports a stopped state.
    #[must_use]
    pub fn all_stopped(&self) -> bool {
        self.active()
            .all(|view| matches!(view.state, RunState::Stopped | RunState::Quitting))
    }

    /// Ids of active workers that have not reported on `generation`.
    #[must_use]
    pub fn pending(&self, generation: u64) -> Vec<String> {
        self.active()
            .filter(|view| view.generation < generation)
            .map(|view| view.worker_id.clone())
            .collect()
    }

    /// Cumulative stats of every worker, current and removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot's histogram cannot be merged.
    pub fn merged_stats(&self) -> Result<RequestStats, DistributedError> {
        let mut stats = RequestStats::default();
        for snapshot in &self.retired {
            stats.merge_snapshot(snapshot)?;
        }
        for view in self.workers.values() {
            stats.merge_snapshot(&view.snapshot)?;
        }
        Ok(stats)
    }
}
