use thiserror::Error;

use super::{ConfigError, DistributedError, RunnerError, ValidationError};

/// Exit code used for fatal startup and runtime errors.
pub const FATAL_EXIT_CODE: i32 = 1;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("CLI error: {source}")]
    Clap {
        #[from]
        source: clap::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("TOML error: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },
    #[error("Join error: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Distributed error: {0}")]
    Distributed(#[from] DistributedError),
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation<E>(error: E) -> Self
    where
        E: Into<ValidationError>,
    {
        error.into().into()
    }

    pub fn config<E>(error: E) -> Self
    where
        E: Into<ConfigError>,
    {
        error.into().into()
    }

    pub fn distributed<E>(error: E) -> Self
    where
        E: Into<DistributedError>,
    {
        error.into().into()
    }

    pub fn runner<E>(error: E) -> Self
    where
        E: Into<RunnerError>,
    {
        error.into().into()
    }

    /// Process exit code for this error.
    ///
    /// Hook-requested exits keep their code; every other failure is fatal.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            AppError::Runner(RunnerError::HookExit { code, .. }) => *code,
            AppError::Io { .. }
            | AppError::Clap { .. }
            | AppError::Json { .. }
            | AppError::Toml { .. }
            | AppError::Join { .. }
            | AppError::Validation(_)
            | AppError::Config(_)
            | AppError::Distributed(_)
            | AppError::Runner(_) => FATAL_EXIT_CODE,
        }
    }
}
