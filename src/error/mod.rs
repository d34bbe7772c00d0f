mod app;
mod config;
mod distributed;
mod runner;
mod validation;

#[cfg(test)]
mod test_support;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use distributed::DistributedError;
pub use runner::RunnerError;
pub use validation::ValidationError;
