mod support_horde;

use std::time::Duration;

use tempfile::tempdir;

use support_horde::{
    IDLE_USERS, expect_log, pick_port, read_stderr, spawn_horde, wait_for_exit, write_config,
};

#[test]
fn e2e_processes_master_forks_its_workers() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let config = write_config(dir.path(), IDLE_USERS)?;
    let config = config.to_string_lossy().into_owned();
    let port = pick_port()?.to_string();

    let mut master = spawn_horde([
        "-f",
        config.as_str(),
        "--master",
        "--processes",
        "2",
        "--master-bind-host",
        "127.0.0.1",
        "--master-bind-port",
        port.as_str(),
        "-u",
        "4",
        "-r",
        "100",
        "-t",
        "2s",
        "--only-summary",
    ])?;

    let status = wait_for_exit(&mut master, Duration::from_secs(30))?;
    let log = read_stderr(&mut master)?;
    if !status.success() {
        return Err(format!("Master failed ({}):\n{}", status, log));
    }
    expect_log(&log, "Started 2 worker processes")?;
    expect_log(&log, "(index 0) reported as ready")?;
    expect_log(&log, "(index 1) reported as ready")?;
    expect_log(&log, "2 workers connected.")?;
    expect_log(&log, "(4 total users)")?;
    Ok(())
}

#[test]
fn e2e_processes_worker_supervisor_joins_remote_master() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let config = write_config(dir.path(), IDLE_USERS)?;
    let config = config.to_string_lossy().into_owned();
    let port = pick_port()?.to_string();

    let mut master = spawn_horde([
        "-f",
        config.as_str(),
        "--master",
        "--master-bind-host",
        "127.0.0.1",
        "--master-bind-port",
        port.as_str(),
        "--expect-workers",
        "2",
        "--expect-workers-max-wait",
        "15s",
        "-u",
        "2",
        "-r",
        "100",
        "-t",
        "1s",
        "--only-summary",
    ])?;
    std::thread::sleep(Duration::from_millis(500));

    let mut workers = spawn_horde([
        "-f",
        config.as_str(),
        "--worker",
        "--processes",
        "2",
        "--master-host",
        "127.0.0.1",
        "--master-port",
        port.as_str(),
    ])?;

    let timeout = Duration::from_secs(30);
    let status_master = wait_for_exit(&mut master, timeout)?;
    let master_log = read_stderr(&mut master)?;
    let status_workers = wait_for_exit(&mut workers, timeout)?;
    let workers_log = read_stderr(&mut workers)?;

    if !status_master.success() {
        return Err(format!("Master failed ({}):\n{}", status_master, master_log));
    }
    if !status_workers.success() {
        return Err(format!(
            "Worker supervisor failed ({}):\n{}",
            status_workers, workers_log
        ));
    }
    expect_log(&master_log, "2 workers connected.")?;
    expect_log(&workers_log, "Got quit message from master, shutting down...")?;
    Ok(())
}

#[test]
fn e2e_processes_without_role_runs_a_local_master() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let config = write_config(dir.path(), IDLE_USERS)?;
    let config = config.to_string_lossy().into_owned();
    let port = pick_port()?.to_string();

    let mut run = spawn_horde([
        "-f",
        config.as_str(),
        "--processes",
        "2",
        "--headless",
        "--master-bind-port",
        port.as_str(),
        "-u",
        "2",
        "-r",
        "100",
        "-t",
        "1",
        "--only-summary",
    ])?;

    let status = wait_for_exit(&mut run, Duration::from_secs(30))?;
    let log = read_stderr(&mut run)?;
    if !status.success() {
        return Err(format!("Run failed ({}):\n{}", status, log));
    }
    expect_log(&log, "Started 2 worker processes")?;
    expect_log(&log, "2 workers connected.")?;
    expect_log(&log, "(2 total users)")?;
    expect_log(&log, "Time limit reached. Stopping")?;
    Ok(())
}
