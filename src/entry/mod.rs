//! Process entry: parses the command line, builds a run plan and executes it.
mod plan;

use std::ffi::OsString;
use std::path::Path;

use clap::{ArgMatches, CommandFactory, FromArgMatches};

use crate::args::HordeArgs;
use crate::config::DEFAULT_CONFIG_FILES;
use crate::error::AppResult;
use crate::logger::init_logging;
use plan::{build_plan, execute_plan};

/// Runs the CLI and returns the process exit code.
///
/// # Errors
///
/// Returns an error when the configuration is invalid or the run fails.
pub fn run() -> AppResult<i32> {
    let raw_args: Vec<OsString> = std::env::args_os().collect();
    let Some((args, matches)) = parse_args(&raw_args)? else {
        return Ok(0);
    };

    init_logging(args.loglevel, args.no_color);

    let forwarded: Vec<OsString> = raw_args.iter().skip(1).cloned().collect();
    let plan = build_plan(args, &matches, &forwarded)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(execute_plan(plan))
}

fn parse_args(raw_args: &[OsString]) -> AppResult<Option<(HordeArgs, ArgMatches)>> {
    let mut cmd = HordeArgs::command();

    if should_show_help(raw_args) {
        cmd.print_help()?;
        println!();
        return Ok(None);
    }

    let matches = cmd.get_matches_from(raw_args);
    let args = HordeArgs::from_arg_matches(&matches)?;

    Ok(Some((args, matches)))
}

fn should_show_help(raw_args: &[OsString]) -> bool {
    let treat_as_empty =
        matches!(raw_args, [] | [_]) || matches!(raw_args, [_, second] if second == "--");
    if !treat_as_empty {
        return false;
    }

    !has_default_config()
}

fn has_default_config() -> bool {
    DEFAULT_CONFIG_FILES
        .iter()
        .any(|path| Path::new(path).exists())
}
