//! Spawn planning: how many users of each class to run and in which order to
//! start or stop them.
mod budget;
mod planner;
mod split;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

pub use budget::{SpawnBudget, ramp_duration};
pub use planner::{Distribution, FixedOverflow, Plan, distribute, plan, plan_step};
pub use split::{WorkerShare, split_target, split_total};

/// Running or desired user count per class name.
pub type ClassCounts = BTreeMap<String, u64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Spawn,
    Stop,
}

/// One user to start or stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Increment {
    pub class: String,
    pub delta: Delta,
}

impl Increment {
    #[must_use]
    pub fn spawn(class: &str) -> Self {
        Self {
            class: class.to_owned(),
            delta: Delta::Spawn,
        }
    }

    #[must_use]
    pub fn stop(class: &str) -> Self {
        Self {
            class: class.to_owned(),
            delta: Delta::Stop,
        }
    }
}

#[must_use]
pub fn total_count(counts: &ClassCounts) -> u64 {
    counts
        .values()
        .fold(0u64, |acc, value| acc.saturating_add(*value))
}

/// Formats counts the way they appear in log lines: `{"A": 2, "B": 4}`.
#[must_use]
pub fn format_counts(counts: &ClassCounts) -> String {
    let body: Vec<String> = counts
        .iter()
        .map(|(name, count)| format!("\"{}\": {}", name, count))
        .collect();
    format!("{{{}}}", body.join(", "))
}
