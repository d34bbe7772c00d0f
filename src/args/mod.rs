//! CLI argument types and parsing helpers.
mod cli;
pub(crate) mod parsers;
mod types;


pub use cli::HordeArgs;
pub(crate) use cli::DEFAULT_MASTER_PORT;
pub use types::{LogLevel, PositiveU64, ProcessCount, SpawnRate};
