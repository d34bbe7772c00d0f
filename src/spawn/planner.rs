use super::{ClassCounts, Delta, Increment, total_count};
use crate::users::UserClassSpec;

/// `sum(fixed_count)` exceeded the requested user count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedOverflow {
    pub fixed_total: u64,
    pub target: u64,
}

impl std::fmt::Display for FixedOverflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Total fixed_count of User classes ({}) is greater than the user count ({}). Fixed-count classes are filled in declaration order until the user count is reached.",
            self.fixed_total, self.target
        )
    }
}

/// Desired per-class counts for a total target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub counts: ClassCounts,
    pub overflow: Option<FixedOverflow>,
}

impl Distribution {
    #[must_use]
    pub fn total(&self) -> u64 {
        total_count(&self.counts)
    }
}

/// Splits `target` users across `classes`.
///
/// Fixed-count classes are filled first, in declaration order, each up to
/// its fixed count while capacity remains. The rest is split across the
/// weighted classes with the largest-remainder method; remainder ties go to
/// the earlier declared class. When only fixed-count classes exist the total
/// never exceeds `sum(fixed_count)`.
#[must_use]
pub fn distribute(classes: &[UserClassSpec], target: u64) -> Distribution {
    let fixed_total = classes
        .iter()
        .filter_map(|class| class.fixed_count)
        .fold(0u64, u64::saturating_add);
    let overflow = (fixed_total > target).then_some(FixedOverflow {
        fixed_total,
        target,
    });

    let mut counts = ClassCounts::new();
    let mut remaining = target;
    for class in classes {
        if let Some(fixed) = class.fixed_count {
            let take = fixed.min(remaining);
            remaining = remaining.saturating_sub(take);
            counts.insert(class.name.clone(), take);
        }
    }

    let weighted: Vec<&UserClassSpec> = classes
        .iter()
        .filter(|class| class.fixed_count.is_none())
        .collect();
    let total_weight: u128 = weighted
        .iter()
        .map(|class| u128::from(class.weight))
        .sum();
    if total_weight == 0 {
        for class in weighted {
            counts.insert(class.name.clone(), 0);
        }
        return Distribution { counts, overflow };
    }

    let capacity = u128::from(remaining);
    let mut shares: Vec<(usize, u64, u128)> = Vec::with_capacity(weighted.len());
    let mut allocated: u128 = 0;
    for (position, class) in weighted.iter().enumerate() {
        let quota = capacity.saturating_mul(u128::from(class.weight));
        let base = quota.checked_div(total_weight).unwrap_or(0);
        let remainder = quota.checked_rem(total_weight).unwrap_or(0);
        allocated = allocated.saturating_add(base);
        shares.push((position, u64::try_from(base).unwrap_or(u64::MAX), remainder));
    }

    let leftover = usize::try_from(capacity.saturating_sub(allocated)).unwrap_or(usize::MAX);
    let mut by_remainder: Vec<usize> = (0..shares.len()).collect();
    by_remainder.sort_by(|left, right| {
        let left_share = shares.get(*left).map_or(0, |share| share.2);
        let right_share = shares.get(*right).map_or(0, |share| share.2);
        right_share.cmp(&left_share).then(left.cmp(right))
    });
    for slot in by_remainder.into_iter().take(leftover) {
        if let Some(share) = shares.get_mut(slot) {
            share.1 = share.1.saturating_add(1);
        }
    }

    for (position, count, _) in shares {
        if let Some(class) = weighted.get(position) {
            counts.insert(class.name.clone(), count);
        }
    }
    Distribution { counts, overflow }
}

/// Next bounded batch of starts and stops moving `current` towards `desired`.
///
/// Classes are visited round-robin in `order` so every class ramps at the
/// same pace. Spawns lead when the total grows, stops lead when it shrinks,
/// and the two queues alternate. At most `budget` increments are returned.
/// Classes running but absent from `desired` are stopped.
#[must_use]
pub fn plan_step(
    current: &ClassCounts,
    desired: &ClassCounts,
    order: &[String],
    budget: u64,
) -> Vec<Increment> {
    let budget = usize::try_from(budget).unwrap_or(usize::MAX);
    if budget == 0 {
        return Vec::new();
    }

    let mut visit: Vec<&str> = order.iter().map(String::as_str).collect();
    for name in current.keys().chain(desired.keys()) {
        if !visit.contains(&name.as_str()) {
            visit.push(name.as_str());
        }
    }

    let mut spawn_needs: Vec<(&str, u64)> = Vec::new();
    let mut stop_needs: Vec<(&str, u64)> = Vec::new();
    for name in visit {
        let have = current.get(name).copied().unwrap_or(0);
        let want = desired.get(name).copied().unwrap_or(0);
        if want > have {
            spawn_needs.push((name, want.saturating_sub(have)));
        } else if have > want {
            stop_needs.push((name, have.saturating_sub(want)));
        }
    }

    let spawns = round_robin(&mut spawn_needs, Delta::Spawn, budget);
    let stops = round_robin(&mut stop_needs, Delta::Stop, budget);
    let ramping_up = total_count(desired) >= total_count(current);
    let (primary, secondary) = if ramping_up {
        (spawns, stops)
    } else {
        (stops, spawns)
    };

    let mut merged = Vec::with_capacity(budget.min(primary.len().saturating_add(secondary.len())));
    let mut primary = primary.into_iter();
    let mut secondary = secondary.into_iter();
    while merged.len() < budget {
        let first = primary.next();
        let had_first = first.is_some();
        if let Some(step) = first {
            merged.push(step);
        }
        if merged.len() >= budget {
            break;
        }
        let second = secondary.next();
        let had_second = second.is_some();
        if let Some(step) = second {
            merged.push(step);
        }
        if !had_first && !had_second {
            break;
        }
    }
    merged
}

fn round_robin(needs: &mut [(&str, u64)], delta: Delta, limit: usize) -> Vec<Increment> {
    let mut queue = Vec::new();
    loop {
        let mut progressed = false;
        for (name, need) in needs.iter_mut() {
            if *need == 0 {
                continue;
            }
            if queue.len() >= limit {
                return queue;
            }
            queue.push(Increment {
                class: (*name).to_owned(),
                delta,
            });
            *need = need.saturating_sub(1);
            progressed = true;
        }
        if !progressed {
            return queue;
        }
    }
}

/// Distribution plus the first bounded step towards it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub distribution: Distribution,
    pub increments: Vec<Increment>,
}

/// Computes the desired counts for `target` and the next `budget` increments
/// from `current`. Calling it again with the resulting counts yields no
/// increments.
#[must_use]
pub fn plan(
    current: &ClassCounts,
    target: u64,
    classes: &[UserClassSpec],
    budget: u64,
) -> Plan {
    let distribution = distribute(classes, target);
    let order: Vec<String> = classes.iter().map(|class| class.name.clone()).collect();
    let increments = plan_step(current, &distribution.counts, &order, budget);
    Plan {
        distribution,
        increments,
    }
}
