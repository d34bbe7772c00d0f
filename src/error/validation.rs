use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid time span format. Valid formats: 20, 20s, 3m, 2h, 1h20m, 3h30m10s, etc.")]
    InvalidTimeSpan { value: String },
    #[error("Duration overflow.")]
    DurationOverflow,
    #[error("Invalid spawn rate '{value}'. Expected a positive decimal such as 10 or 0.5.")]
    InvalidSpawnRate { value: String },
    #[error("Spawn rate must be > 0.")]
    SpawnRateZero,
    #[error("Value must be >= {min}.")]
    ValueTooSmall { min: u64 },
    #[error("Invalid value: {source}")]
    InvalidNumber {
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("Invalid process count '{value}'. Use a positive number or -1 for one per CPU core.")]
    InvalidProcessCount { value: String },
    #[error("--processes cannot be combined with a worker index ({context}).")]
    ProcessesConflict { context: &'static str },
    #[error("Could not determine the path of the running executable: {source}")]
    CurrentExe {
        #[source]
        source: std::io::Error,
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
