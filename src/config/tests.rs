use super::types::{DurationValue, TaskActionConfig, WaitConfig};
use super::{apply_config, explicit_options, load_config_file};
use clap::{CommandFactory, FromArgMatches};
use std::time::Duration;
use tempfile::tempdir;

use crate::args::HordeArgs;
use crate::error::{AppError, AppResult, ConfigError};

const SAMPLE_TOML: &str = r#"
user_count = 10
spawn_rate = 0.5
run_time = "1m30s"
host = "http://127.0.0.1:8089"

[[users]]
name = "Browser"
weight = 3
wait = { min = "100ms", max = "1s" }
tags = ["web"]

[[users.tasks]]
name = "index"
action = "http"
path = "/"
expect_status = 200

[[users.tasks]]
name = "think"
weight = 2
action = "idle"

[[users]]
name = "Admin"
fixed_count = 1
wait = 2

[[users.tasks]]
name = "boom"
action = "error"
message = "kaput"

[[shapes]]
name = "Steps"
use_common_options = true

[[shapes.stages]]
until = "10s"
users = 5
spawn_rate = 5

[[shapes.stages]]
until = "20s"
users = 10
spawn_rate = "2.5"
"#;

fn parse_with(argv: &[&str]) -> AppResult<(HordeArgs, clap::ArgMatches)> {
    let matches = HordeArgs::command().try_get_matches_from(argv)?;
    let args = HordeArgs::from_arg_matches(&matches)?;
    Ok((args, matches))
}

#[test]
fn parse_toml_config_with_users_and_shapes() -> AppResult<()> {
    let dir = tempdir()?;
    let path = dir.path().join("horde.toml");
    std::fs::write(&path, SAMPLE_TOML)?;

    let config = load_config_file(&path)?;
    if config.users.len() != 2 || config.shapes.len() != 1 {
        return Err(AppError::config("Unexpected class/shape count"));
    }
    let browser = config
        .users
        .first()
        .ok_or_else(|| AppError::config("Missing Browser"))?;
    if browser.weight != Some(3) || browser.tasks.len() != 2 {
        return Err(AppError::config("Unexpected Browser definition"));
    }
    match browser.wait.as_ref() {
        Some(WaitConfig::Between { min, max }) => {
            if min.to_duration()? != Duration::from_millis(100)
                || max.to_duration()? != Duration::from_secs(1)
            {
                return Err(AppError::config("Unexpected wait bounds"));
            }
        }
        Some(WaitConfig::Constant(_)) | None => {
            return Err(AppError::config("Expected wait range"));
        }
    }
    match browser.tasks.first().map(|task| &task.action) {
        Some(TaskActionConfig::Http {
            path,
            expect_status: Some(200),
            ..
        }) if path == "/" => {}
        other => {
            return Err(AppError::config(format!("Unexpected first task: {:?}", other)));
        }
    }
    let stage = config
        .shapes
        .first()
        .and_then(|shape| shape.stages.get(1))
        .ok_or_else(|| AppError::config("Missing stage"))?;
    if stage.spawn_rate.to_spawn_rate()?.milli() != 2500 {
        return Err(AppError::config("Unexpected stage rate"));
    }
    Ok(())
}

#[test]
fn parse_json_config() -> AppResult<()> {
    let dir = tempdir()?;
    let path = dir.path().join("horde.json");
    let content = r#"{
        "user_count": 3,
        "users": [
            {"name": "Api", "weight": 1, "tasks": [{"name": "noop", "action": "idle"}]}
        ]
    }"#;
    std::fs::write(&path, content)?;
    let config = load_config_file(&path)?;
    if config.user_count != Some(3) || config.users.len() != 1 {
        return Err(AppError::config("Unexpected JSON config"));
    }
    Ok(())
}

#[test]
fn unsupported_extension_is_rejected() -> AppResult<()> {
    let dir = tempdir()?;
    let path = dir.path().join("horde.yaml");
    std::fs::write(&path, "users: []")?;
    match load_config_file(&path) {
        Err(AppError::Config(ConfigError::UnsupportedExtension { ext })) if ext == "yaml" => Ok(()),
        other => Err(AppError::config(format!("Unexpected result: {:?}", other.map(|_| ())))),
    }
}

#[test]
fn config_values_fill_missing_cli_options() -> AppResult<()> {
    let dir = tempdir()?;
    let path = dir.path().join("horde.toml");
    std::fs::write(&path, SAMPLE_TOML)?;
    let config = load_config_file(&path)?;

    let (mut args, matches) = parse_with(&["horde", "-u", "4"])?;
    apply_config(&mut args, &matches, &config)?;
    if args.users != Some(4) {
        return Err(AppError::config("CLI users should win over config"));
    }
    if args.spawn_rate.map(|rate| rate.milli()) != Some(500) {
        return Err(AppError::config("Config spawn rate should apply"));
    }
    if args.run_time != Some(Duration::from_secs(90)) {
        return Err(AppError::config("Config run time should apply"));
    }
    if args.host.as_deref() != Some("http://127.0.0.1:8089") {
        return Err(AppError::config("Config host should apply"));
    }
    Ok(())
}

#[test]
fn zero_run_time_in_config_is_rejected() -> AppResult<()> {
    let dir = tempdir()?;
    let path = dir.path().join("horde.toml");
    std::fs::write(&path, "run_time = 0\n")?;
    let config = load_config_file(&path)?;
    let (mut args, matches) = parse_with(&["horde"])?;
    match apply_config(&mut args, &matches, &config) {
        Err(AppError::Config(ConfigError::InvalidField { field: "run_time", .. })) => Ok(()),
        other => Err(AppError::config(format!("Unexpected result: {:?}", other))),
    }
}

#[test]
fn explicit_options_lists_only_command_line_flags() -> AppResult<()> {
    let (_, matches) = parse_with(&["horde", "-t", "10s", "-r", "3"])?;
    let explicit = explicit_options(
        &matches,
        &[
            ("run_time", "--run-time"),
            ("users", "--users"),
            ("spawn_rate", "--spawn-rate"),
        ],
    );
    if explicit != vec!["--run-time", "--spawn-rate"] {
        return Err(AppError::config(format!("Unexpected options: {:?}", explicit)));
    }
    Ok(())
}

#[test]
fn duration_value_accepts_numbers_and_text() -> AppResult<()> {
    if DurationValue::Seconds(5).to_duration()? != Duration::from_secs(5) {
        return Err(AppError::config("Unexpected seconds value"));
    }
    if DurationValue::Text("2m".to_owned()).to_duration()? != Duration::from_secs(120) {
        return Err(AppError::config("Unexpected text value"));
    }
    Ok(())
}
