//! Core library for the `horde` CLI.
//!
//! Runs simulated users against a target: locally, as the master or a worker
//! of a distributed run, or as a supervisor of forked worker processes. The
//! binary wires the CLI to [`entry::run`]; the runner types can also be
//! embedded directly, with the in-process transport standing in for TCP.
pub mod args;
pub mod config;
pub mod entry;
pub mod error;
#[cfg(feature = "fuzzing")]
pub mod fuzzing;
pub mod heartbeat;
pub mod logger;
pub mod pool;
pub mod runner;
pub mod shutdown;
pub mod shutdown_handlers;
pub mod spawn;
pub mod stats;
pub mod supervisor;
pub mod transport;
pub mod users;
