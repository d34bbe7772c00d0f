use std::path::PathBuf;
use thiserror::Error;

use super::ValidationError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to parse JSON config '{path}': {source}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported config extension '{ext}'. Use .toml or .json.")]
    UnsupportedExtension { ext: String },
    #[error("Config file must have .toml or .json extension.")]
    MissingExtension,
    #[error("No user classes defined (add [[users]] to the config file).")]
    NoUserClasses,
    #[error("Duplicate user class names: {name} is defined more than once.")]
    DuplicateUserClass { name: String },
    #[error("Duplicate shape classes: {name}")]
    DuplicateShape { name: String },
    #[error("Multiple shapes defined ({names}); select one with --shape.")]
    AmbiguousShape { names: String },
    #[error("Unknown shape '{name}'.")]
    UnknownShape { name: String },
    #[error("Shape '{name}' must define at least one stage.")]
    ShapeWithoutStages { name: String },
    #[error("Unknown User(s): {names}")]
    UnknownUserClasses { names: String },
    #[error("User class '{name}' weight must be >= 1.")]
    ZeroWeight { name: String },
    #[error("{name} had no tasks left after filtering, instead of running nothing it will be removed. No tasks defined on {name}.")]
    NoTasksAfterFiltering { name: String },
    #[error("No tasks defined on {name}.")]
    NoTasks { name: String },
    #[error("Task '{task}' of user class '{name}' is an HTTP task, but no host was set (use --host or host = \"...\").")]
    MissingHost { name: String, task: String },
    #[error("Task '{task}' of user class '{name}' has invalid HTTP method '{method}'.")]
    InvalidMethod {
        name: String,
        task: String,
        method: String,
    },
    #[error("Failed to build HTTP client: {source}")]
    HttpClient {
        #[source]
        source: reqwest::Error,
    },
    #[error("Invalid host '{value}': {source}")]
    InvalidHost {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Invalid value for '{field}': {source}")]
    InvalidField {
        field: &'static str,
        #[source]
        source: ValidationError,
    },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
