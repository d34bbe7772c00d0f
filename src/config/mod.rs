//! Configuration loading and application.
mod apply;
mod loader;
pub mod types;

#[cfg(test)]
mod tests;

pub use apply::{apply_config, explicit_options};
pub(crate) use apply::is_cli;
pub(crate) use loader::DEFAULT_CONFIG_FILES;
pub use loader::{load_config, load_config_file};
