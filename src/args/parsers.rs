use std::time::Duration;

use super::types::{PositiveU64, ProcessCount, SpawnRate};
use crate::error::{AppError, AppResult, ValidationError};

/// Parses `20`, `20s`, `3m`, `2h`, `1h20m`, `3h30m10s` or `500ms`.
///
/// A bare number is taken as seconds.
pub(crate) fn parse_time_span(s: &str) -> Result<Duration, ValidationError> {
    let value = s.trim();
    let invalid = || ValidationError::InvalidTimeSpan {
        value: s.to_owned(),
    };
    if value.is_empty() {
        return Err(invalid());
    }
    if value.chars().all(|ch| ch.is_ascii_digit()) {
        let secs: u64 = value
            .parse()
            .map_err(|err| ValidationError::InvalidNumber { source: err })?;
        return Ok(Duration::from_secs(secs));
    }

    let mut total_ms: u64 = 0;
    let mut rest = value;
    while !rest.is_empty() {
        let digits_len = rest.chars().take_while(char::is_ascii_digit).count();
        if digits_len == 0 {
            return Err(invalid());
        }
        let (num_part, tail) = rest.split_at(digits_len);
        let number: u64 = num_part
            .parse()
            .map_err(|err| ValidationError::InvalidNumber { source: err })?;
        let unit_len = tail.chars().take_while(char::is_ascii_alphabetic).count();
        let (unit, remaining) = tail.split_at(unit_len);
        let factor_ms: u64 = match unit {
            "ms" => 1,
            "s" => 1000,
            "m" => 60 * 1000,
            "h" => 60 * 60 * 1000,
            _ => return Err(invalid()),
        };
        total_ms = number
            .checked_mul(factor_ms)
            .and_then(|part| total_ms.checked_add(part))
            .ok_or(ValidationError::DurationOverflow)?;
        rest = remaining;
    }
    Ok(Duration::from_millis(total_ms))
}

pub(crate) fn parse_positive_time_span(s: &str) -> Result<Duration, ValidationError> {
    let duration = parse_time_span(s)?;
    if duration.is_zero() {
        return Err(ValidationError::InvalidTimeSpan {
            value: s.to_owned(),
        });
    }
    Ok(duration)
}

pub(super) fn parse_spawn_rate(s: &str) -> AppResult<SpawnRate> {
    s.parse::<SpawnRate>().map_err(AppError::from)
}

pub(super) fn parse_positive_u64(s: &str) -> AppResult<PositiveU64> {
    s.parse::<PositiveU64>().map_err(AppError::from)
}

pub(super) fn parse_process_count(s: &str) -> AppResult<ProcessCount> {
    s.parse::<ProcessCount>().map_err(AppError::from)
}
