use clap::ArgMatches;
use clap::parser::ValueSource;

use crate::args::{HordeArgs, PositiveU64};
use crate::error::{AppError, AppResult, ConfigError, ValidationError};

use super::types::{ConfigFile, DurationValue};

/// Fills CLI options that were not given on the command line from the config file.
///
/// # Errors
///
/// Returns an error when a config value is invalid.
pub fn apply_config(args: &mut HordeArgs, matches: &ArgMatches, config: &ConfigFile) -> AppResult<()> {
    if !is_cli(matches, "users")
        && let Some(users) = config.user_count
    {
        args.users = Some(users);
    }

    if !is_cli(matches, "spawn_rate")
        && let Some(rate) = config.spawn_rate.as_ref()
    {
        args.spawn_rate = Some(rate.to_spawn_rate().map_err(|err| field_error("spawn_rate", err))?);
    }

    if !is_cli(matches, "run_time")
        && let Some(run_time) = config.run_time.as_ref()
    {
        args.run_time = Some(positive_duration(run_time, "run_time")?);
    }

    if !is_cli(matches, "stop_timeout")
        && let Some(value) = config.stop_timeout.as_ref()
    {
        args.stop_timeout = duration(value, "stop_timeout")?;
    }

    if !is_cli(matches, "host")
        && let Some(host) = config.host.clone()
    {
        args.host = Some(host);
    }

    if !is_cli(matches, "expect_workers")
        && let Some(expect) = config.expect_workers
    {
        args.expect_workers = expect;
    }

    if !is_cli(matches, "expect_workers_max_wait")
        && let Some(value) = config.expect_workers_max_wait.as_ref()
    {
        args.expect_workers_max_wait = Some(positive_duration(value, "expect_workers_max_wait")?);
    }

    if !is_cli(matches, "heartbeat_interval")
        && let Some(value) = config.heartbeat_interval.as_ref()
    {
        args.heartbeat_interval = positive_duration(value, "heartbeat_interval")?;
    }

    if !is_cli(matches, "heartbeat_liveness")
        && let Some(value) = config.heartbeat_liveness
    {
        args.heartbeat_liveness =
            PositiveU64::try_from(value).map_err(|err| field_error("heartbeat_liveness", err))?;
    }

    if !is_cli(matches, "master_heartbeat_timeout")
        && let Some(value) = config.master_heartbeat_timeout.as_ref()
    {
        args.master_heartbeat_timeout = positive_duration(value, "master_heartbeat_timeout")?;
    }

    if !is_cli(matches, "worker_report_wait")
        && let Some(value) = config.worker_report_wait.as_ref()
    {
        args.worker_report_wait = duration(value, "worker_report_wait")?;
    }

    if !is_cli(matches, "tags")
        && let Some(tags) = config.tags.clone()
    {
        args.tags = tags;
    }

    if !is_cli(matches, "exclude_tags")
        && let Some(tags) = config.exclude_tags.clone()
    {
        args.exclude_tags = tags;
    }

    if !is_cli(matches, "exit_code_on_error")
        && let Some(code) = config.exit_code_on_error
    {
        args.exit_code_on_error = code;
    }

    if !is_cli(matches, "shape")
        && let Some(shape) = config.shape.clone()
    {
        args.shape = Some(shape);
    }

    if !is_cli(matches, "only_summary")
        && let Some(only_summary) = config.only_summary
    {
        args.only_summary = only_summary;
    }

    if !is_cli(matches, "stats_interval")
        && let Some(value) = config.stats_interval.as_ref()
    {
        args.stats_interval = positive_duration(value, "stats_interval")?;
    }

    Ok(())
}

/// Options the user typed explicitly, as shown in warnings.
#[must_use]
pub fn explicit_options(matches: &ArgMatches, ids: &[(&str, &'static str)]) -> Vec<&'static str> {
    ids.iter()
        .filter(|(id, _)| is_cli(matches, id))
        .map(|(_, flag)| *flag)
        .collect()
}

pub(crate) fn is_cli(matches: &ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(ValueSource::CommandLine)
}

fn duration(value: &DurationValue, field: &'static str) -> AppResult<std::time::Duration> {
    value.to_duration().map_err(|err| field_error(field, err))
}

fn positive_duration(
    value: &DurationValue,
    field: &'static str,
) -> AppResult<std::time::Duration> {
    let parsed = duration(value, field)?;
    if parsed.is_zero() {
        return Err(field_error(field, ValidationError::ValueTooSmall { min: 1 }));
    }
    Ok(parsed)
}

fn field_error(field: &'static str, source: ValidationError) -> AppError {
    AppError::config(ConfigError::InvalidField { field, source })
}
