use super::*;
use crate::args::SpawnRate;
use crate::error::{AppError, AppResult};
use crate::users::UserClassSpec;
use std::time::Duration;
use tokio::time::Instant;

fn counts(pairs: &[(&str, u64)]) -> ClassCounts {
    pairs
        .iter()
        .map(|(name, count)| ((*name).to_owned(), *count))
        .collect()
}

fn apply(current: &mut ClassCounts, increments: &[Increment]) {
    for step in increments {
        let slot = current.entry(step.class.clone()).or_insert(0);
        *slot = match step.delta {
            Delta::Spawn => slot.saturating_add(1),
            Delta::Stop => slot.saturating_sub(1),
        };
    }
}

#[test]
fn equal_weights_split_ten_as_four_three_three() -> AppResult<()> {
    let classes = [
        UserClassSpec::weighted("A", 1),
        UserClassSpec::weighted("B", 1),
        UserClassSpec::weighted("C", 1),
    ];
    let distribution = distribute(&classes, 10);
    if distribution.counts != counts(&[("A", 4), ("B", 3), ("C", 3)]) {
        return Err(AppError::runner(format!(
            "Unexpected distribution: {:?}",
            distribution.counts
        )));
    }
    if distribution.overflow.is_some() {
        return Err(AppError::runner("Unexpected overflow"));
    }
    Ok(())
}

#[test]
fn fixed_count_is_satisfied_before_weights() -> AppResult<()> {
    let classes = [
        UserClassSpec::weighted("User1", 1),
        UserClassSpec::fixed("User2", 2),
        UserClassSpec::weighted("User3", 1),
    ];
    let distribution = distribute(&classes, 10);
    if distribution.counts != counts(&[("User1", 4), ("User2", 2), ("User3", 4)]) {
        return Err(AppError::runner(format!(
            "Unexpected distribution: {:?}",
            distribution.counts
        )));
    }
    Ok(())
}

#[test]
fn weighted_shares_sum_to_target_within_one_of_ideal() -> AppResult<()> {
    let weight_sets: [&[u32]; 4] = [&[1, 2, 3], &[5, 1], &[7, 7, 7, 1], &[100, 1, 1]];
    for weights in weight_sets {
        let classes: Vec<UserClassSpec> = weights
            .iter()
            .enumerate()
            .map(|(idx, weight)| UserClassSpec::weighted(&format!("C{}", idx), *weight))
            .collect();
        let total_weight: u64 = weights.iter().map(|weight| u64::from(*weight)).sum();
        for target in [0u64, 1, 7, 10, 99, 1000] {
            let distribution = distribute(&classes, target);
            if distribution.total() != target {
                return Err(AppError::runner(format!(
                    "Total {} != {} for {:?}",
                    distribution.total(),
                    target,
                    weights
                )));
            }
            for (class, weight) in classes.iter().zip(weights.iter()) {
                let got = distribution.counts.get(&class.name).copied().unwrap_or(0);
                let ideal_floor = target * u64::from(*weight) / total_weight;
                if got < ideal_floor || got > ideal_floor + 1 {
                    return Err(AppError::runner(format!(
                        "{} got {} (ideal floor {}) for target {}",
                        class.name, got, ideal_floor, target
                    )));
                }
            }
        }
    }
    Ok(())
}

#[test]
fn fixed_overflow_is_flagged_and_capped_in_declaration_order() -> AppResult<()> {
    let classes = [
        UserClassSpec::fixed("A", 3),
        UserClassSpec::fixed("B", 2),
        UserClassSpec::weighted("C", 1),
    ];
    let distribution = distribute(&classes, 4);
    if distribution.counts != counts(&[("A", 3), ("B", 1), ("C", 0)]) {
        return Err(AppError::runner(format!(
            "Unexpected distribution: {:?}",
            distribution.counts
        )));
    }
    match distribution.overflow {
        Some(overflow) if overflow.fixed_total == 5 && overflow.target == 4 => {
            if !overflow
                .to_string()
                .starts_with("Total fixed_count of User classes (5) is greater than ")
            {
                return Err(AppError::runner(format!("Unexpected warning: {}", overflow)));
            }
            Ok(())
        }
        other => Err(AppError::runner(format!("Unexpected overflow: {:?}", other))),
    }
}

#[test]
fn only_fixed_classes_cap_total_at_fixed_sum() -> AppResult<()> {
    let classes = [UserClassSpec::fixed("A", 2), UserClassSpec::fixed("B", 1)];
    let distribution = distribute(&classes, 10);
    if distribution.total() != 3 {
        return Err(AppError::runner(format!(
            "Unexpected total: {}",
            distribution.total()
        )));
    }
    Ok(())
}

#[test]
fn plan_step_interleaves_classes_and_respects_budget() -> AppResult<()> {
    let order = vec!["A".to_owned(), "B".to_owned()];
    let desired = counts(&[("A", 3), ("B", 3)]);
    let steps = plan_step(&ClassCounts::new(), &desired, &order, 4);
    let expected = vec![
        Increment::spawn("A"),
        Increment::spawn("B"),
        Increment::spawn("A"),
        Increment::spawn("B"),
    ];
    if steps != expected {
        return Err(AppError::runner(format!("Unexpected steps: {:?}", steps)));
    }
    Ok(())
}

#[test]
fn plan_step_prioritises_stops_when_ramping_down() -> AppResult<()> {
    let order = vec!["A".to_owned(), "B".to_owned()];
    let current = counts(&[("A", 5), ("B", 0)]);
    let desired = counts(&[("A", 1), ("B", 1)]);
    let steps = plan_step(&current, &desired, &order, 3);
    let expected = vec![
        Increment::stop("A"),
        Increment::spawn("B"),
        Increment::stop("A"),
    ];
    if steps != expected {
        return Err(AppError::runner(format!("Unexpected steps: {:?}", steps)));
    }
    Ok(())
}

#[test]
fn plan_step_stops_classes_missing_from_target() -> AppResult<()> {
    let current = counts(&[("Old", 2)]);
    let steps = plan_step(&current, &ClassCounts::new(), &["New".to_owned()], 10);
    if steps != vec![Increment::stop("Old"), Increment::stop("Old")] {
        return Err(AppError::runner(format!("Unexpected steps: {:?}", steps)));
    }
    Ok(())
}

#[test]
fn applying_the_same_target_twice_is_idempotent() -> AppResult<()> {
    let classes = [
        UserClassSpec::weighted("A", 2),
        UserClassSpec::fixed("B", 1),
        UserClassSpec::weighted("C", 1),
    ];
    let mut current = ClassCounts::new();
    let first = plan(&current, 9, &classes, u64::MAX);
    apply(&mut current, &first.increments);
    if current != first.distribution.counts {
        return Err(AppError::runner("First plan did not reach the target"));
    }
    let second = plan(&current, 9, &classes, u64::MAX);
    if !second.increments.is_empty() {
        return Err(AppError::runner(format!(
            "Expected no increments, got {:?}",
            second.increments
        )));
    }
    Ok(())
}

#[test]
fn zero_target_stops_everything_at_bounded_rate() -> AppResult<()> {
    let classes = [UserClassSpec::weighted("A", 1), UserClassSpec::weighted("B", 1)];
    let mut current = counts(&[("A", 3), ("B", 3)]);
    let step = plan(&current, 0, &classes, 4);
    if step.increments.len() != 4
        || step
            .increments
            .iter()
            .any(|increment| increment.delta != Delta::Stop)
    {
        return Err(AppError::runner(format!(
            "Unexpected increments: {:?}",
            step.increments
        )));
    }
    apply(&mut current, &step.increments);
    let rest = plan(&current, 0, &classes, 4);
    apply(&mut current, &rest.increments);
    if total_count(&current) != 0 {
        return Err(AppError::runner("Expected every user stopped"));
    }
    Ok(())
}

#[test]
fn split_deals_classes_round_robin_across_workers() -> AppResult<()> {
    let classes = [
        UserClassSpec::weighted("A", 1),
        UserClassSpec::weighted("B", 1),
    ];
    let global = counts(&[("A", 5), ("B", 4)]);
    let rate = SpawnRate::per_second(10)?;
    let shares = split_target(&classes, &global, &[2, 0], rate);
    let totals: Vec<u64> = shares.iter().map(|share| total_count(&share.counts)).collect();
    if totals != vec![5, 4] {
        return Err(AppError::runner(format!("Unexpected totals: {:?}", totals)));
    }
    let first = shares
        .first()
        .ok_or_else(|| AppError::runner("Missing share"))?;
    if first.index != 0 || first.counts != counts(&[("A", 3), ("B", 2)]) {
        return Err(AppError::runner(format!("Unexpected first share: {:?}", first)));
    }
    let rates: Vec<u64> = shares.iter().map(|share| share.spawn_rate.milli()).collect();
    if rates != vec![5000, 5000] {
        return Err(AppError::runner(format!("Unexpected rates: {:?}", rates)));
    }
    for class in &classes {
        let sum: u64 = shares
            .iter()
            .map(|share| share.counts.get(&class.name).copied().unwrap_or(0))
            .sum();
        if Some(&sum) != global.get(&class.name) {
            return Err(AppError::runner("Per-class totals not preserved"));
        }
    }
    Ok(())
}

#[test]
fn split_rate_never_drops_to_zero() -> AppResult<()> {
    let classes = [UserClassSpec::weighted("A", 1)];
    let rate = SpawnRate::from_milli(2)?;
    let shares = split_target(&classes, &counts(&[("A", 3)]), &[0, 1, 2], rate);
    if shares.iter().any(|share| share.spawn_rate.milli() == 0) {
        return Err(AppError::runner("Zero spawn rate share"));
    }
    Ok(())
}

#[test]
fn budget_grants_first_user_immediately_and_carries_fractions() -> AppResult<()> {
    let start = Instant::now();
    let mut budget = SpawnBudget::new("0.5".parse()?, start);
    if budget.take(start) != 1 {
        return Err(AppError::runner("First user should be immediate"));
    }
    if budget.take(start + Duration::from_millis(1000)) != 0 {
        return Err(AppError::runner("Half a user after one second"));
    }
    if budget.take(start + Duration::from_millis(2000)) != 1 {
        return Err(AppError::runner("One user after two seconds"));
    }
    let mut fast = SpawnBudget::new(SpawnRate::per_second(10)?, start);
    let granted = fast.take(start + Duration::from_millis(500));
    if granted != 6 {
        return Err(AppError::runner(format!("Unexpected grant: {}", granted)));
    }
    Ok(())
}

#[test]
fn ramp_duration_matches_rate() -> AppResult<()> {
    let rate = SpawnRate::per_second(4)?;
    if ramp_duration(10, rate) != Duration::from_millis(2500) {
        return Err(AppError::runner("Unexpected ramp duration"));
    }
    if format_counts(&counts(&[("User1", 2), ("User2", 4)])) != r#"{"User1": 2, "User2": 4}"# {
        return Err(AppError::runner("Unexpected count formatting"));
    }
    Ok(())
}
