use std::collections::HashSet;
use std::ffi::OsString;
use std::sync::Arc;

use clap::ArgMatches;
use tracing::{debug, warn};

use crate::args::{HordeArgs, SpawnRate};
use crate::config::types::{ConfigFile, ShapeConfig};
use crate::config::{apply_config, explicit_options, is_cli, load_config};
use crate::error::{AppError, AppResult, ConfigError, ValidationError};
use crate::heartbeat::HeartbeatSettings;
use crate::runner::{
    ConfigHooks, DEFAULT_USERS, Hooks, MasterSettings, RunnerSettings, ShapeController,
    StagesShape, ignored_option_warnings,
};
use crate::supervisor::worker_command_args;
use crate::users::{ConfigCatalog, TagFilter, UserCatalog, UserClassSet};

use super::types::{ChildPlan, RunPlan, RunSetup};

/// Options a load shape overrides, as `(argument id, flag)`.
const SHAPE_OVERRIDDEN: [(&str, &str); 3] = [
    ("users", "--users"),
    ("spawn_rate", "--spawn-rate"),
    ("run_time", "--run-time"),
];

/// Address forked workers use to reach a master bound to every interface.
const LOCAL_MASTER_HOST: &str = "127.0.0.1";
/// Bind hosts that mean "every interface" rather than a dialable address.
const WILDCARD_HOSTS: [&str; 4] = ["", "0.0.0.0", "::", "[::]"];

pub(crate) fn build_plan(
    mut args: HordeArgs,
    matches: &ArgMatches,
    raw_args: &[OsString],
) -> AppResult<RunPlan> {
    let config = load_config(args.config.as_deref())?;
    if let Some(config) = config.as_ref() {
        apply_config(&mut args, matches, config)?;
    }
    let config = config.unwrap_or_default();

    if args.child_process && args.processes.is_some() {
        return Err(AppError::validation(ValidationError::ProcessesConflict {
            context: "child process",
        }));
    }

    let setup = build_setup(&args, matches, &config)?;

    let processes = args.processes.map(|count| count.resolve());
    // Without a role, `--processes` runs a master next to its forked workers.
    if args.master || (processes.is_some() && !args.worker) {
        let children = processes.map(|count| ChildPlan {
            args: worker_command_args(
                raw_args,
                child_master_host(&args.master_bind_host),
                args.master_bind_port,
            ),
            count,
        });
        let expect_workers_set =
            is_cli(matches, "expect_workers") || config.expect_workers.is_some();
        let expect_workers = match children.as_ref() {
            Some(plan) if !expect_workers_set => plan.count,
            Some(_) | None => args.expect_workers,
        };
        return Ok(RunPlan::Master {
            setup,
            master: MasterSettings {
                expect_workers,
                expect_workers_max_wait: args.expect_workers_max_wait,
            },
            bind_addr: format!("{}:{}", args.master_bind_host, args.master_bind_port),
            children,
        });
    }

    if let Some(count) = processes {
        return Ok(RunPlan::Supervisor(ChildPlan {
            args: worker_command_args(raw_args, &args.master_host, args.master_port),
            count,
        }));
    }

    if args.worker {
        return Ok(RunPlan::Worker {
            setup,
            master_addr: format!("{}:{}", args.master_host, args.master_port),
            child_process: args.child_process,
        });
    }

    Ok(RunPlan::Local(setup))
}

/// Host forked children dial to reach a master bound to `bind_host`.
fn child_master_host(bind_host: &str) -> &str {
    if WILDCARD_HOSTS.contains(&bind_host) {
        LOCAL_MASTER_HOST
    } else {
        bind_host
    }
}

fn build_setup(args: &HordeArgs, matches: &ArgMatches, config: &ConfigFile) -> AppResult<RunSetup> {
    let settings = runner_settings(args, config)?;
    // A worker may leave `[[users]]` out and run the classes its master sends.
    let (catalog, classes) = if args.worker && config.users.is_empty() {
        debug!("No user classes defined locally, waiting for the master's");
        (Arc::new(ConfigCatalog::empty()), UserClassSet::empty())
    } else {
        let catalog = Arc::new(ConfigCatalog::from_config(&config.users)?);
        let classes = catalog
            .build(&settings.tags, args.host.as_deref())?
            .select(&args.user_classes)?;
        debug!("Loaded user classes: {}", classes.names().join(", "));
        (catalog, classes)
    };
    let class_source = config.users.clone();

    let shape = select_shape(&config.shapes, args.shape.as_deref())?;
    if let Some(shape) = shape.as_ref() {
        let explicit = explicit_options(matches, &SHAPE_OVERRIDDEN);
        for line in ignored_option_warnings(shape.use_common_options(), &explicit) {
            warn!("{}", line);
        }
    }

    let mut hooks = Hooks::default();
    if let Some(hooks_config) = config.hooks.clone() {
        hooks.push(Arc::new(ConfigHooks::new(hooks_config)));
    }

    Ok(RunSetup {
        settings,
        catalog,
        classes,
        class_source,
        hooks,
        shape,
        only_summary: args.only_summary,
    })
}

fn runner_settings(args: &HordeArgs, config: &ConfigFile) -> AppResult<RunnerSettings> {
    let missing_grace = config.missing_worker_grace.as_ref().map_or_else(
        || Ok(HeartbeatSettings::default().missing_grace),
        |value| {
            value.to_duration().map_err(|err| {
                AppError::config(ConfigError::InvalidField {
                    field: "missing_worker_grace",
                    source: err,
                })
            })
        },
    )?;
    Ok(RunnerSettings {
        users: args.users.unwrap_or(DEFAULT_USERS),
        spawn_rate: args.spawn_rate.unwrap_or(SpawnRate::ONE),
        run_time: args.run_time,
        stop_timeout: args.stop_timeout,
        host: args.host.clone(),
        tags: TagFilter {
            include: args.tags.clone(),
            exclude: args.exclude_tags.clone(),
        },
        exit_code_on_error: args.exit_code_on_error,
        stats_interval: args.stats_interval,
        heartbeat: HeartbeatSettings {
            interval: args.heartbeat_interval,
            liveness: args.heartbeat_liveness.get(),
            master_timeout: args.master_heartbeat_timeout,
            missing_grace,
        },
        worker_report_wait: args.worker_report_wait,
    })
}

/// Picks the shape to run: the named one, or the only one defined.
fn select_shape(shapes: &[ShapeConfig], requested: Option<&str>) -> AppResult<Option<ShapeController>> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(shapes.len());
    for shape in shapes {
        if !seen.insert(shape.name.as_str()) {
            return Err(AppError::config(ConfigError::DuplicateShape {
                name: shape.name.clone(),
            }));
        }
    }

    let chosen = match (requested, shapes) {
        (Some(name), _) => {
            let found = shapes.iter().find(|shape| shape.name == name);
            Some(found.ok_or_else(|| {
                AppError::config(ConfigError::UnknownShape {
                    name: name.to_owned(),
                })
            })?)
        }
        (None, []) => None,
        (None, [only]) => Some(only),
        (None, _) => {
            let names: Vec<&str> = shapes.iter().map(|shape| shape.name.as_str()).collect();
            return Err(AppError::config(ConfigError::AmbiguousShape {
                names: names.join(", "),
            }));
        }
    };

    let Some(config) = chosen else {
        return Ok(None);
    };
    let shape = StagesShape::from_config(config)?;
    Ok(Some(ShapeController::new(Box::new(shape))))
}
