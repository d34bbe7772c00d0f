use super::build::build_plan;
use super::types::RunPlan;
use clap::{CommandFactory, FromArgMatches};
use std::ffi::OsString;
use tempfile::tempdir;

use crate::args::HordeArgs;
use crate::error::{AppError, AppResult, ConfigError, ValidationError};

const USERS: &str = r#"
[[users]]
name = "Reader"
weight = 2
[[users.tasks]]
name = "idle"
action = "idle"

[[users]]
name = "Writer"
[[users.tasks]]
name = "idle"
action = "idle"
"#;

const STEPS_SHAPE: &str = r#"
[[shapes]]
name = "Steps"
[[shapes.stages]]
until = "10s"
users = 5
spawn_rate = 5
"#;

fn plan_for(config: &str, extra: &[&str]) -> AppResult<RunPlan> {
    let dir = tempdir()?;
    let path = dir.path().join("horde.toml");
    std::fs::write(&path, config)?;
    let mut argv: Vec<String> = vec![
        "horde".to_owned(),
        "-f".to_owned(),
        path.to_string_lossy().into_owned(),
    ];
    argv.extend(extra.iter().map(|arg| (*arg).to_owned()));

    let matches = HordeArgs::command().try_get_matches_from(&argv)?;
    let args = HordeArgs::from_arg_matches(&matches)?;
    let raw: Vec<OsString> = argv.iter().skip(1).map(OsString::from).collect();
    build_plan(args, &matches, &raw)
}

fn unexpected(plan: &RunPlan) -> AppError {
    AppError::config(format!("Unexpected {} plan", plan.mode()))
}

#[test]
fn plain_run_is_local() -> AppResult<()> {
    let plan = plan_for(USERS, &["-u", "3", "-r", "0.5"])?;
    let RunPlan::Local(setup) = plan else {
        return Err(unexpected(&plan));
    };
    if setup.settings.users != 3 || setup.settings.spawn_rate.milli() != 500 {
        return Err(AppError::config("Settings did not follow the command line"));
    }
    if setup.classes.names() != vec!["Reader".to_owned(), "Writer".to_owned()] {
        return Err(AppError::config("Unexpected class selection"));
    }
    Ok(())
}

#[test]
fn positional_classes_narrow_the_selection() -> AppResult<()> {
    let plan = plan_for(USERS, &["Writer"])?;
    let RunPlan::Local(setup) = plan else {
        return Err(unexpected(&plan));
    };
    if setup.classes.names() != vec!["Writer".to_owned()] {
        return Err(AppError::config("Selection ignored"));
    }
    Ok(())
}

#[test]
fn unknown_class_is_rejected() -> AppResult<()> {
    match plan_for(USERS, &["Nobody"]) {
        Err(AppError::Config(ConfigError::UnknownUserClasses { names })) if names == "Nobody" => {
            Ok(())
        }
        Err(err) => Err(err),
        Ok(plan) => Err(unexpected(&plan)),
    }
}

#[test]
fn master_with_processes_expects_its_children() -> AppResult<()> {
    let plan = plan_for(USERS, &["--master", "--processes", "3", "--master-bind-port", "6001"])?;
    let RunPlan::Master {
        master,
        bind_addr,
        children,
        ..
    } = plan
    else {
        return Err(unexpected(&plan));
    };
    if master.expect_workers != 3 || bind_addr != "0.0.0.0:6001" {
        return Err(AppError::config(format!(
            "Unexpected master settings: {} workers on {}",
            master.expect_workers, bind_addr
        )));
    }
    let Some(children) = children else {
        return Err(AppError::config("Expected forked workers"));
    };
    let args: Vec<String> = children
        .args
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();
    let tail: Vec<&str> = args.iter().rev().take(6).rev().map(String::as_str).collect();
    if children.count != 3
        || args.iter().any(|arg| arg == "--master" || arg == "--processes")
        || tail
            != [
                "--worker",
                "--child-process",
                "--master-host",
                "127.0.0.1",
                "--master-port",
                "6001",
            ]
    {
        return Err(AppError::config(format!("Unexpected child args: {:?}", args)));
    }
    Ok(())
}

#[test]
fn explicit_expect_workers_wins_over_process_count() -> AppResult<()> {
    let plan = plan_for(
        USERS,
        &["--master", "--processes", "2", "--expect-workers", "4"],
    )?;
    let RunPlan::Master { master, .. } = plan else {
        return Err(unexpected(&plan));
    };
    if master.expect_workers != 4 {
        return Err(AppError::config("Explicit --expect-workers was ignored"));
    }
    Ok(())
}

#[test]
fn worker_flag_connects_to_master() -> AppResult<()> {
    let plan = plan_for(USERS, &["--worker", "--master-host", "10.1.2.3"])?;
    let RunPlan::Worker {
        master_addr,
        child_process,
        ..
    } = plan
    else {
        return Err(unexpected(&plan));
    };
    if master_addr != "10.1.2.3:5557" || child_process {
        return Err(AppError::config(format!("Unexpected worker plan: {}", master_addr)));
    }
    Ok(())
}

#[test]
fn worker_with_processes_only_supervises() -> AppResult<()> {
    let plan = plan_for(USERS, &["--worker", "--processes", "2"])?;
    let RunPlan::Supervisor(children) = plan else {
        return Err(unexpected(&plan));
    };
    if children.count != 2 {
        return Err(AppError::config("Unexpected child count"));
    }
    Ok(())
}

#[test]
fn worker_without_users_waits_for_masters_classes() -> AppResult<()> {
    let plan = plan_for("", &["--worker"])?;
    let RunPlan::Worker { setup, .. } = plan else {
        return Err(unexpected(&plan));
    };
    if !setup.classes.names().is_empty() || !setup.class_source.is_empty() {
        return Err(AppError::config("Expected no local user classes"));
    }
    Ok(())
}

#[test]
fn local_run_without_users_is_rejected() -> AppResult<()> {
    match plan_for("", &[]) {
        Err(AppError::Config(ConfigError::NoUserClasses)) => Ok(()),
        Err(err) => Err(err),
        Ok(plan) => Err(unexpected(&plan)),
    }
}

fn child_args(children: &super::types::ChildPlan) -> Vec<String> {
    children
        .args
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

#[test]
fn processes_without_role_runs_master_with_children() -> AppResult<()> {
    let plan = plan_for(USERS, &["--processes", "2", "--headless", "-t", "1"])?;
    let RunPlan::Master {
        master, children, ..
    } = plan
    else {
        return Err(unexpected(&plan));
    };
    let Some(children) = children else {
        return Err(AppError::config("Expected forked workers"));
    };
    if children.count != 2 || master.expect_workers != 2 {
        return Err(AppError::config(format!(
            "Unexpected counts: {} children, {} expected workers",
            children.count, master.expect_workers
        )));
    }
    let args = child_args(&children);
    if !args.windows(2).any(|pair| pair == ["--master-host", "127.0.0.1"]) {
        return Err(AppError::config(format!("Unexpected child args: {:?}", args)));
    }
    Ok(())
}

#[test]
fn children_dial_a_specific_bind_host() -> AppResult<()> {
    let plan = plan_for(
        USERS,
        &["--master", "--processes", "1", "--master-bind-host", "10.0.0.5"],
    )?;
    let RunPlan::Master {
        children: Some(children),
        ..
    } = plan
    else {
        return Err(unexpected(&plan));
    };
    let args = child_args(&children);
    if !args.windows(2).any(|pair| pair == ["--master-host", "10.0.0.5"]) {
        return Err(AppError::config(format!("Unexpected child args: {:?}", args)));
    }
    Ok(())
}

#[test]
fn child_process_cannot_fork() -> AppResult<()> {
    match plan_for(USERS, &["--worker", "--child-process", "--processes", "2"]) {
        Err(AppError::Validation(ValidationError::ProcessesConflict { .. })) => Ok(()),
        Err(err) => Err(err),
        Ok(plan) => Err(unexpected(&plan)),
    }
}

#[test]
fn single_shape_is_selected() -> AppResult<()> {
    let config = format!("{}{}", USERS, STEPS_SHAPE);
    let plan = plan_for(&config, &[])?;
    let RunPlan::Local(setup) = plan else {
        return Err(unexpected(&plan));
    };
    match setup.shape.as_ref() {
        Some(shape) if shape.name() == "Steps" => Ok(()),
        Some(_) | None => Err(AppError::config("Expected the Steps shape")),
    }
}

#[test]
fn duplicate_shapes_are_rejected() -> AppResult<()> {
    let config = format!("{}{}{}", USERS, STEPS_SHAPE, STEPS_SHAPE);
    match plan_for(&config, &[]) {
        Err(AppError::Config(ConfigError::DuplicateShape { name })) if name == "Steps" => Ok(()),
        Err(err) => Err(err),
        Ok(plan) => Err(unexpected(&plan)),
    }
}

#[test]
fn several_shapes_need_a_choice() -> AppResult<()> {
    let other = STEPS_SHAPE.replace("Steps", "Spike");
    let config = format!("{}{}{}", USERS, STEPS_SHAPE, other);
    match plan_for(&config, &[]) {
        Err(AppError::Config(ConfigError::AmbiguousShape { .. })) => {}
        Err(err) => return Err(err),
        Ok(plan) => return Err(unexpected(&plan)),
    }
    let plan = plan_for(&config, &["--shape", "Spike"])?;
    let RunPlan::Local(setup) = plan else {
        return Err(unexpected(&plan));
    };
    match setup.shape.as_ref() {
        Some(shape) if shape.name() == "Spike" => Ok(()),
        Some(_) | None => Err(AppError::config("Expected the Spike shape")),
    }
}

#[test]
fn unknown_shape_is_rejected() -> AppResult<()> {
    let config = format!("{}{}", USERS, STEPS_SHAPE);
    match plan_for(&config, &["--shape", "Missing"]) {
        Err(AppError::Config(ConfigError::UnknownShape { .. })) => Ok(()),
        Err(err) => Err(err),
        Ok(plan) => Err(unexpected(&plan)),
    }
}

#[test]
fn missing_worker_grace_comes_from_config() -> AppResult<()> {
    let config = format!("missing_worker_grace = \"45s\"\n{}", USERS);
    let plan = plan_for(&config, &[])?;
    let RunPlan::Local(setup) = plan else {
        return Err(unexpected(&plan));
    };
    if setup.settings.heartbeat.missing_grace != std::time::Duration::from_secs(45) {
        return Err(AppError::config("Grace was not applied"));
    }
    Ok(())
}
