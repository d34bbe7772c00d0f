use super::{RequestStats, StatsEntry};

const NAME_WIDTH: usize = 40;

/// Stats table with one row per request name and a final `Aggregated` row.
#[must_use]
pub fn stats_table_lines(stats: &RequestStats) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!(
        "{:<8} {:<width$} {:>8} {:>14} | {:>7} {:>7} {:>7} {:>7} | {:>7} {:>7}",
        "Type",
        "Name",
        "# reqs",
        "# fails",
        "Avg",
        "Min",
        "Max",
        "Med",
        "90%ile",
        "99%ile",
        width = NAME_WIDTH
    ));
    lines.push(separator());
    for (kind, name, entry) in stats.entries() {
        lines.push(row(kind, name, entry));
    }
    lines.push(separator());
    lines.push(row("", "Aggregated", stats.total()));
    lines
}

/// Failure breakdown, empty when nothing failed.
#[must_use]
pub fn error_report_lines(stats: &RequestStats) -> Vec<String> {
    let mut lines = Vec::new();
    let mut errors = stats.errors().peekable();
    if errors.peek().is_none() {
        return lines;
    }
    lines.push("Error report".to_owned());
    lines.push(format!("{:>13}  {}", "# occurrences", "Error"));
    lines.push(separator());
    for (kind, name, error, occurrences) in errors {
        lines.push(format!("{:>13}  {} {}: {}", occurrences, kind, name, error));
    }
    lines.push(separator());
    lines
}

fn row(kind: &str, name: &str, entry: &StatsEntry) -> String {
    let percentiles = entry.percentiles();
    format!(
        "{:<8} {:<width$} {:>8} {:>14} | {:>7} {:>7} {:>7} {:>7} | {:>7} {:>7}",
        kind,
        truncate(name),
        entry.num_requests,
        format!("{}({})", entry.num_failures, failure_percent(entry)),
        entry.avg_ms(),
        entry.min_ms.unwrap_or(0),
        entry.max_ms,
        percentiles.p50,
        percentiles.p90,
        percentiles.p99,
        width = NAME_WIDTH
    )
}

fn separator() -> String {
    "-".repeat(NAME_WIDTH.saturating_add(90))
}

fn truncate(name: &str) -> String {
    if name.chars().count() <= NAME_WIDTH {
        return name.to_owned();
    }
    let head: String = name.chars().take(NAME_WIDTH.saturating_sub(3)).collect();
    format!("{}...", head)
}

/// Failure ratio as a percentage with two decimals, e.g. `12.50%`.
fn failure_percent(entry: &StatsEntry) -> String {
    let basis_points = u128::from(entry.num_failures)
        .saturating_mul(10_000)
        .checked_div(u128::from(entry.num_requests))
        .unwrap_or(0);
    let whole = basis_points.checked_div(100).unwrap_or(0);
    let frac = basis_points.checked_rem(100).unwrap_or(0);
    format!("{}.{:02}%", whole, frac)
}
