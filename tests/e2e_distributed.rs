mod support_horde;

use std::time::Duration;

use tempfile::tempdir;

use support_horde::{
    IDLE_USERS, expect_log, pick_port, read_stderr, spawn_horde, spawn_horde_quiet,
    wait_for_exit, write_config,
};

#[test]
fn e2e_distributed_master_with_two_workers() -> Result<(), String> {
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
        "6",
        "-r",
        "100",
        "-t",
        "2s",
        "--only-summary",
    ])?;
    std::thread::sleep(Duration::from_millis(500));

    let worker_args = [
        "-f",
        config.as_str(),
        "--worker",
        "--master-host",
        "127.0.0.1",
        "--master-port",
        port.as_str(),
    ];
    let mut worker_1 = spawn_horde_quiet(worker_args)?;
    let mut worker_2 = spawn_horde_quiet(worker_args)?;

    let timeout = Duration::from_secs(30);
    let status_master = wait_for_exit(&mut master, timeout)?;
    let log = read_stderr(&mut master)?;
    let status_worker_1 = wait_for_exit(&mut worker_1, timeout)?;
    let status_worker_2 = wait_for_exit(&mut worker_2, timeout)?;

    if !status_master.success() {
        return Err(format!("Master failed ({}):\n{}", status_master, log));
    }
    if !status_worker_1.success() {
        return Err(format!("Worker 1 failed ({}).", status_worker_1));
    }
    if !status_worker_2.success() {
        return Err(format!("Worker 2 failed ({}).", status_worker_2));
    }
    expect_log(&log, "2 workers connected.")?;
    expect_log(&log, "(6 total users)")?;
    expect_log(&log, "Time limit reached. Stopping")?;
    Ok(())
}

#[test]
fn e2e_distributed_master_gives_up_without_workers() -> Result<(), String> {
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
        "1",
        "--expect-workers-max-wait",
        "1s",
        "-t",
        "5s",
    ])?;

    let status = wait_for_exit(&mut master, Duration::from_secs(15))?;
    let log = read_stderr(&mut master)?;
    if status.code() != Some(1) {
        return Err(format!("unexpected status {}:\n{}", status, log));
    }
    expect_log(&log, "Waiting for workers to be ready, 0 of 1 connected")
}
