use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::args::SpawnRate;
use crate::error::RunnerError;
use crate::pool::UserPool;
use crate::spawn::{ClassCounts, Delta, SpawnBudget, format_counts, plan_step};

/// How often a ramp in progress starts or stops its next batch of users.
pub const RAMP_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampProgress {
    Spawning,
    Complete,
}

/// Moves a pool toward a desired per-class count at a bounded rate.
#[derive(Debug, Clone)]
pub struct Ramp {
    desired: ClassCounts,
    order: Vec<String>,
    budget: SpawnBudget,
}

impl Ramp {
    #[must_use]
    pub fn new(desired: ClassCounts, order: Vec<String>, rate: SpawnRate, now: Instant) -> Self {
        Self {
            desired,
            order,
            budget: SpawnBudget::new(rate, now),
        }
    }

    #[must_use]
    pub const fn desired(&self) -> &ClassCounts {
        &self.desired
    }

    #[must_use]
    pub const fn rate(&self) -> SpawnRate {
        self.budget.rate()
    }

    /// Applies the next batch allowed by the spawn rate.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool rejects a class.
    pub fn advance(&mut self, pool: &mut UserPool, now: Instant) -> Result<RampProgress, RunnerError> {
        let current = pool.running_counts();
        let needed = distance(&current, &self.desired);
        if needed == 0 {
            return Ok(RampProgress::Complete);
        }
        let granted = self.budget.take(now).min(needed);
        self.budget.clamp_to(needed.saturating_sub(granted));
        let steps = plan_step(&current, &self.desired, &self.order, granted);
        if steps.is_empty() {
            return Ok(RampProgress::Spawning);
        }

        let mut spawning = ClassCounts::new();
        let mut stopping = ClassCounts::new();
        for step in &steps {
            let bucket = match step.delta {
                Delta::Spawn => &mut spawning,
                Delta::Stop => &mut stopping,
            };
            let count = bucket.entry(step.class.clone()).or_insert(0);
            *count = count.saturating_add(1);
        }
        if !spawning.is_empty() {
            info!(
                "Spawning additional {} ({} already running)...",
                format_counts(&spawning),
                format_counts(&current)
            );
        }
        if !stopping.is_empty() {
            debug!(
                "Stopping {} ({} running)",
                format_counts(&stopping),
                format_counts(&current)
            );
        }
        pool.adjust(&steps)?;

        if distance(&pool.running_counts(), &self.desired) == 0 {
            Ok(RampProgress::Complete)
        } else {
            Ok(RampProgress::Spawning)
        }
    }
}

/// Users that still have to be started or stopped.
#[must_use]
pub fn distance(current: &ClassCounts, desired: &ClassCounts) -> u64 {
    let mut total = 0u64;
    for name in current.keys().chain(desired.keys().filter(|name| !current.contains_key(*name))) {
        let have = current.get(name).copied().unwrap_or(0);
        let want = desired.get(name).copied().unwrap_or(0);
        total = total.saturating_add(have.abs_diff(want));
    }
    total
}
