use std::time::Duration;

use clap::{ArgMatches, CommandFactory, FromArgMatches};

use crate::args::parsers::parse_time_span;
use crate::args::{HordeArgs, PositiveU64, ProcessCount, SpawnRate};
use crate::config::apply_config;
use crate::config::types::ConfigFile;
use crate::error::{AppError, AppResult};
use crate::transport::{WireMessage, decode_line, encode_line};
use crate::users::ConfigCatalog;

thread_local! {
    static BASE_MATCHES: ArgMatches = HordeArgs::command().get_matches_from(["horde"]);
}

/// Parses TOML config, applies it to defaults and builds its user classes.
///
/// # Errors
///
/// Returns an error when parsing or validation fails.
pub fn apply_config_from_toml(input: &str) -> AppResult<HordeArgs> {
    let config: ConfigFile = toml::from_str(input)?;
    apply_config_to_defaults(&config)
}

/// Parses JSON config, applies it to defaults and builds its user classes.
///
/// # Errors
///
/// Returns an error when parsing or validation fails.
pub fn apply_config_from_json(input: &[u8]) -> AppResult<HordeArgs> {
    let config: ConfigFile = serde_json::from_slice(input)?;
    apply_config_to_defaults(&config)
}

/// Parses a time span (e.g. `20`, `3m`, `1h30m`).
///
/// # Errors
///
/// Returns an error when the span is invalid.
pub fn parse_time_span_input(input: &str) -> AppResult<Duration> {
    parse_time_span(input).map_err(AppError::from)
}

/// Parses a spawn rate (e.g. `10`, `0.5`).
///
/// # Errors
///
/// Returns an error when the rate is invalid or zero.
pub fn parse_spawn_rate_input(input: &str) -> AppResult<SpawnRate> {
    input.parse::<SpawnRate>().map_err(AppError::from)
}

/// Parses a `--processes` value.
///
/// # Errors
///
/// Returns an error when the count is invalid.
pub fn parse_process_count_input(input: &str) -> AppResult<usize> {
    let count = input.parse::<ProcessCount>().map_err(AppError::from)?;
    Ok(count.resolve())
}

/// Parses a positive u64 string value.
///
/// # Errors
///
/// Returns an error when the value is invalid or zero.
pub fn parse_positive_u64_input(input: &str) -> AppResult<u64> {
    let value = input.parse::<PositiveU64>().map_err(AppError::from)?;
    Ok(value.get())
}

/// Decodes one wire line and encodes it again.
///
/// # Errors
///
/// Returns an error when the line is not a valid message.
pub fn reencode_wire_line(input: &[u8]) -> AppResult<(WireMessage, String)> {
    let message = decode_line(input)?;
    let line = encode_line(&message)?;
    Ok((message, line))
}

fn apply_config_to_defaults(config: &ConfigFile) -> AppResult<HordeArgs> {
    BASE_MATCHES.with(|matches| {
        let mut args = HordeArgs::from_arg_matches(matches)?;
        apply_config(&mut args, matches, config)?;
        ConfigCatalog::from_config(&config.users)?;
        Ok(args)
    })
}
