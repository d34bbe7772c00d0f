use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::args::parsers::parse_time_span;
use crate::error::ValidationError;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub user_count: Option<u64>,
    pub spawn_rate: Option<NumberValue>,
    pub run_time: Option<DurationValue>,
    pub stop_timeout: Option<DurationValue>,
    pub host: Option<String>,
    pub expect_workers: Option<usize>,
    pub expect_workers_max_wait: Option<DurationValue>,
    pub heartbeat_interval: Option<DurationValue>,
    pub heartbeat_liveness: Option<u64>,
    pub master_heartbeat_timeout: Option<DurationValue>,
    pub worker_report_wait: Option<DurationValue>,
    pub missing_worker_grace: Option<DurationValue>,
    pub tags: Option<Vec<String>>,
    pub exclude_tags: Option<Vec<String>>,
    pub exit_code_on_error: Option<i32>,
    pub shape: Option<String>,
    pub only_summary: Option<bool>,
    pub stats_interval: Option<DurationValue>,
    #[serde(default)]
    pub users: Vec<UserClassConfig>,
    #[serde(default)]
    pub shapes: Vec<ShapeConfig>,
    pub hooks: Option<HooksConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserClassConfig {
    pub name: String,
    pub weight: Option<u32>,
    pub fixed_count: Option<u64>,
    pub host: Option<String>,
    pub wait: Option<WaitConfig>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaitConfig {
    Constant(DurationValue),
    Between { min: DurationValue, max: DurationValue },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub weight: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub action: TaskActionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TaskActionConfig {
    Idle,
    Http {
        method: Option<String>,
        path: String,
        expect_status: Option<u16>,
    },
    Error {
        message: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShapeConfig {
    pub name: String,
    #[serde(default)]
    pub use_common_options: bool,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub until: DurationValue,
    pub users: u64,
    pub spawn_rate: NumberValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HooksConfig {
    pub init_error: Option<String>,
    pub test_start: Option<ExitHookConfig>,
    pub quitting_exit_code: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExitHookConfig {
    pub exit_code: i32,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self) -> Result<Duration, ValidationError> {
        match self {
            DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationValue::Text(text) => parse_time_span(text),
        }
    }
}

/// Spawn rate as written in a config file: `2`, `0.5` or `"0.5"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumberValue {
    Whole(u64),
    Decimal(f64),
    Text(String),
}

impl NumberValue {
    pub(crate) fn to_spawn_rate(&self) -> Result<crate::args::SpawnRate, ValidationError> {
        match self {
            NumberValue::Whole(value) => crate::args::SpawnRate::per_second(*value),
            NumberValue::Decimal(value) => value.to_string().parse(),
            NumberValue::Text(text) => text.parse(),
        }
    }
}
