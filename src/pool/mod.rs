//! Live user units on one process.
mod unit;


use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::RunnerError;
use crate::spawn::{ClassCounts, Delta, Increment, total_count};
use crate::stats::StatsRecorder;
use crate::users::{UserClassSet, UserContext};

use unit::{UnitHandle, spawn_unit};

/// Owns every executing user unit and keeps per-class running counts.
///
/// Only the owning runner mutates the pool; other tasks observe counts
/// through [`UserPool::subscribe`].
pub struct UserPool {
    classes: UserClassSet,
    recorder: StatsRecorder,
    worker_index: Option<u64>,
    default_host: Option<Arc<str>>,
    units: BTreeMap<String, Vec<UnitHandle>>,
    retiring: Vec<UnitHandle>,
    next_unit_id: u64,
    counts_tx: watch::Sender<ClassCounts>,
}

impl UserPool {
    #[must_use]
    pub fn new(classes: UserClassSet, recorder: StatsRecorder, default_host: Option<&str>) -> Self {
        let counts = zero_counts(&classes);
        let (counts_tx, _) = watch::channel(counts);
        Self {
            classes,
            recorder,
            worker_index: None,
            default_host: default_host.map(Arc::from),
            units: BTreeMap::new(),
            retiring: Vec::new(),
            next_unit_id: 0,
            counts_tx,
        }
    }

    pub const fn set_worker_index(&mut self, index: Option<u64>) {
        self.worker_index = index;
    }

    /// Swaps the class set used for new units; running units keep theirs.
    pub fn set_classes(&mut self, classes: UserClassSet) {
        self.classes = classes;
        self.publish();
    }

    #[must_use]
    pub const fn classes(&self) -> &UserClassSet {
        &self.classes
    }

    /// Notified on every change of the running counts.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ClassCounts> {
        self.counts_tx.subscribe()
    }

    /// Running units per class, including classes with none running.
    #[must_use]
    pub fn running_counts(&self) -> ClassCounts {
        let mut counts = zero_counts(&self.classes);
        for (name, units) in &self.units {
            counts.insert(name.clone(), u64::try_from(units.len()).unwrap_or(u64::MAX));
        }
        counts
    }

    #[must_use]
    pub fn user_count(&self) -> u64 {
        total_count(&self.running_counts())
    }

    /// Starts and stops units as listed.
    ///
    /// Stopped units finish their current task before exiting.
    ///
    /// # Errors
    ///
    /// Returns an error when asked to spawn a class that is not in the set.
    pub fn adjust(&mut self, increments: &[Increment]) -> Result<(), RunnerError> {
        if increments.is_empty() {
            return Ok(());
        }
        let mut result = Ok(());
        for step in increments {
            match step.delta {
                Delta::Spawn => {
                    let Some(class) = self.classes.get(&step.class).cloned() else {
                        result = Err(RunnerError::UnknownClassInTarget {
                            name: step.class.clone(),
                        });
                        break;
                    };
                    let unit_id = self.next_unit_id;
                    self.next_unit_id = self.next_unit_id.saturating_add(1);
                    let host = class.host().cloned().or_else(|| self.default_host.clone());
                    let ctx = UserContext::new(
                        Arc::from(class.name()),
                        unit_id,
                        self.worker_index,
                        host,
                        self.recorder.clone(),
                    );
                    let handle = spawn_unit(class, ctx);
                    self.units.entry(step.class.clone()).or_default().push(handle);
                }
                Delta::Stop => {
                    let handle = self
                        .units
                        .get_mut(&step.class)
                        .and_then(Vec::pop);
                    match handle {
                        Some(handle) => {
                            handle.request_stop();
                            self.retiring.push(handle);
                        }
                        None => debug!("No running {} unit to stop", step.class),
                    }
                }
            }
        }
        self.units.retain(|_, units| !units.is_empty());
        self.reap();
        self.publish();
        result
    }

    /// Forgets units that finished after being asked to stop.
    pub fn reap(&mut self) {
        self.retiring.retain(|handle| !handle.is_finished());
    }

    /// Stops every unit.
    ///
    /// Graceful stops let units finish their current task for up to
    /// `timeout` before the rest are cancelled; otherwise units are cancelled
    /// right away.
    pub async fn stop_all(&mut self, graceful: bool, timeout: Duration) {
        self.begin_stop().finish(graceful, timeout).await;
    }

    /// Takes every unit out of the pool and asks it to stop.
    ///
    /// The pool reports zero running users from here on; the returned drain
    /// owns the units until they are gone.
    #[must_use]
    pub fn begin_stop(&mut self) -> PoolDrain {
        let mut handles: Vec<UnitHandle> = std::mem::take(&mut self.retiring);
        for (_, units) in std::mem::take(&mut self.units) {
            handles.extend(units);
        }
        self.publish();
        for handle in &handles {
            handle.request_stop();
        }
        PoolDrain { handles }
    }

    fn publish(&self) {
        self.counts_tx.send_replace(self.running_counts());
    }
}

/// Units taken out of a pool that are on their way out.
pub struct PoolDrain {
    handles: Vec<UnitHandle>,
}

impl PoolDrain {
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for the units, bounded by `timeout` when graceful, then cancels
    /// whatever is left.
    pub async fn finish(mut self, graceful: bool, timeout: Duration) {
        if self.handles.is_empty() {
            return;
        }
        if graceful && !timeout.is_zero() {
            let waiting = join_all(self.handles.iter_mut().map(UnitHandle::wait));
            if tokio::time::timeout(timeout, waiting).await.is_err() {
                let left = self
                    .handles
                    .iter()
                    .filter(|handle| !handle.is_finished())
                    .count();
                warn!(
                    "{} users did not stop within {}ms, cancelling them",
                    left,
                    timeout.as_millis()
                );
            }
        }
        for handle in &self.handles {
            handle.abort();
        }
        join_all(self.handles.iter_mut().map(UnitHandle::wait)).await;
    }
}

fn zero_counts(classes: &UserClassSet) -> ClassCounts {
    classes
        .iter()
        .map(|class| (class.name().to_owned(), 0))
        .collect()
}
