use super::ClassCounts;
use crate::args::SpawnRate;
use crate::users::UserClassSpec;

/// Part of the global target one worker is asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerShare {
    pub index: u64,
    pub counts: ClassCounts,
    pub spawn_rate: SpawnRate,
}

/// Deals the global per-class target across workers.
///
/// Users are dealt class by class, continuing round-robin from the worker
/// after the one that received the previous class's last user, so worker
/// totals differ by at most one. Workers are ordered by index. The spawn
/// rate is divided evenly with every worker keeping a non-zero share.
#[must_use]
pub fn split_target(
    classes: &[UserClassSpec],
    global: &ClassCounts,
    worker_indices: &[u64],
    rate: SpawnRate,
) -> Vec<WorkerShare> {
    let mut indices = worker_indices.to_vec();
    indices.sort_unstable();
    indices.dedup();
    let workers = indices.len();
    if workers == 0 {
        return Vec::new();
    }

    let mut per_worker: Vec<ClassCounts> = vec![ClassCounts::new(); workers];
    let workers_u64 = u64::try_from(workers).unwrap_or(u64::MAX);
    let mut cursor = 0usize;
    for class in classes {
        let total = global.get(&class.name).copied().unwrap_or(0);
        let base = total.checked_div(workers_u64).unwrap_or(0);
        let extra = usize::try_from(total.checked_rem(workers_u64).unwrap_or(0)).unwrap_or(0);
        for counts in &mut per_worker {
            counts.insert(class.name.clone(), base);
        }
        for offset in 0..extra {
            let slot = cursor
                .saturating_add(offset)
                .checked_rem(workers)
                .unwrap_or(0);
            if let Some(count) = per_worker
                .get_mut(slot)
                .and_then(|counts| counts.get_mut(&class.name))
            {
                *count = count.saturating_add(1);
            }
        }
        cursor = cursor.saturating_add(extra).checked_rem(workers).unwrap_or(0);
    }

    let rates = split_total(rate.milli(), &vec![1; workers]);
    indices
        .into_iter()
        .zip(per_worker)
        .zip(rates)
        .map(|((index, counts), milli)| WorkerShare {
            index,
            counts,
            spawn_rate: SpawnRate::from_milli(milli.max(1)).unwrap_or(SpawnRate::ONE),
        })
        .collect()
}

/// Splits `total` proportionally to `weights`, handing the remainder out
/// one unit at a time from the first slot.
#[must_use]
pub fn split_total(total: u64, weights: &[u64]) -> Vec<u64> {
    if weights.is_empty() {
        return Vec::new();
    }
    let total_weight: u128 = weights.iter().map(|value| u128::from(*value)).sum();
    if total_weight == 0 {
        return vec![0; weights.len()];
    }

    let mut shares = vec![0u64; weights.len()];
    let mut remainder = u128::from(total);
    for (idx, weight) in weights.iter().enumerate() {
        let share = u128::from(total)
            .saturating_mul(u128::from(*weight))
            .checked_div(total_weight)
            .unwrap_or(0);
        if let Some(slot) = shares.get_mut(idx) {
            *slot = u64::try_from(share).unwrap_or(u64::MAX);
        }
        remainder = remainder.saturating_sub(share);
    }

    let mut idx = 0usize;
    while remainder > 0 {
        if let Some(value) = shares.get_mut(idx) {
            *value = value.saturating_add(1);
        }
        remainder = remainder.saturating_sub(1);
        idx = idx.saturating_add(1);
        if idx >= shares.len() {
            idx = 0;
        }
    }

    shares
}
