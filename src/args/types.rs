use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::num::{NonZeroU64, NonZeroUsize};

use crate::error::ValidationError;

/// Milli-users per second in one user per second.
const MILLIS_PER_UNIT: u64 = 1000;

/// Users started or stopped per second, stored as fixed-point milli-users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct SpawnRate(NonZeroU64);

impl SpawnRate {
    pub const ONE: SpawnRate = match NonZeroU64::new(MILLIS_PER_UNIT) {
        Some(value) => SpawnRate(value),
        None => SpawnRate(NonZeroU64::MIN),
    };

    /// Builds a rate from whole users per second.
    ///
    /// # Errors
    ///
    /// Returns an error when `users_per_sec` is zero.
    pub fn per_second(users_per_sec: u64) -> Result<Self, ValidationError> {
        Self::from_milli(users_per_sec.saturating_mul(MILLIS_PER_UNIT))
    }

    /// Builds a rate from milli-users per second.
    ///
    /// # Errors
    ///
    /// Returns an error when `milli` is zero.
    pub fn from_milli(milli: u64) -> Result<Self, ValidationError> {
        NonZeroU64::new(milli)
            .map(SpawnRate)
            .ok_or(ValidationError::SpawnRateZero)
    }

    #[must_use]
    pub const fn milli(self) -> u64 {
        self.0.get()
    }

    /// Whole users per second, rounded up.
    #[must_use]
    pub const fn ceil_per_second(self) -> u64 {
        self.0.get().div_ceil(MILLIS_PER_UNIT)
    }
}

impl Default for SpawnRate {
    fn default() -> Self {
        SpawnRate::ONE
    }
}

impl TryFrom<u64> for SpawnRate {
    type Error = ValidationError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        SpawnRate::from_milli(value)
    }
}

impl From<SpawnRate> for u64 {
    fn from(value: SpawnRate) -> Self {
        value.milli()
    }
}

impl std::str::FromStr for SpawnRate {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        let invalid = || ValidationError::InvalidSpawnRate {
            value: s.to_owned(),
        };
        let (whole, frac) = value.split_once('.').unwrap_or((value, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|ch| ch.is_ascii_digit())
            || !frac.chars().all(|ch| ch.is_ascii_digit())
            || frac.len() > 3
        {
            return Err(invalid());
        }
        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_err| invalid())?
        };
        let mut frac_milli: u64 = 0;
        let mut scale: u64 = 100;
        for digit in frac.chars().filter_map(|ch| ch.to_digit(10)) {
            frac_milli = frac_milli.saturating_add(u64::from(digit).saturating_mul(scale));
            scale = scale.checked_div(10).unwrap_or(0);
        }
        let milli = whole
            .checked_mul(MILLIS_PER_UNIT)
            .and_then(|value| value.checked_add(frac_milli))
            .ok_or_else(invalid)?;
        SpawnRate::from_milli(milli)
    }
}

impl std::fmt::Display for SpawnRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let milli = self.milli();
        let whole = milli.checked_div(MILLIS_PER_UNIT).unwrap_or(0);
        let hundredths = milli
            .checked_rem(MILLIS_PER_UNIT)
            .unwrap_or(0)
            .checked_div(10)
            .unwrap_or(0);
        write!(f, "{}.{:02}", whole, hundredths)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositiveU64(NonZeroU64);

impl PositiveU64 {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl TryFrom<u64> for PositiveU64 {
    type Error = ValidationError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        NonZeroU64::new(value)
            .map(PositiveU64)
            .ok_or(ValidationError::ValueTooSmall { min: 1 })
    }
}

impl std::str::FromStr for PositiveU64 {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u64 = s
            .trim()
            .parse()
            .map_err(|err| ValidationError::InvalidNumber { source: err })?;
        PositiveU64::try_from(value)
    }
}

impl From<PositiveU64> for u64 {
    fn from(value: PositiveU64) -> Self {
        value.get()
    }
}

/// Worker process count for `--processes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessCount {
    /// One worker process per available CPU core (`-1`).
    PerCore,
    Fixed(NonZeroUsize),
}

impl ProcessCount {
    #[must_use]
    pub fn resolve(self) -> usize {
        match self {
            ProcessCount::Fixed(count) => count.get(),
            ProcessCount::PerCore => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
        }
    }
}

impl std::str::FromStr for ProcessCount {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value == "-1" {
            return Ok(ProcessCount::PerCore);
        }
        value
            .parse::<usize>()
            .ok()
            .and_then(NonZeroUsize::new)
            .map(ProcessCount::Fixed)
            .ok_or_else(|| ValidationError::InvalidProcessCount {
                value: s.to_owned(),
            })
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    #[value(name = "DEBUG", alias = "debug")]
    Debug,
    #[default]
    #[value(name = "INFO", alias = "info")]
    Info,
    #[value(name = "WARNING", alias = "warning", alias = "warn")]
    Warning,
    #[value(name = "ERROR", alias = "error")]
    Error,
    #[value(name = "CRITICAL", alias = "critical")]
    Critical,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}
