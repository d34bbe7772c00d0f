mod support_horde;

use std::time::Duration;

use tempfile::tempdir;

use support_horde::{
    FAILING_USERS, IDLE_USERS, expect_log, expect_log_order, interrupt, read_stderr, run_horde,
    spawn_horde, stderr_of, wait_for_exit, write_config,
};

const SHAPED_USERS: &str = r#"
[[users]]
name = "Reader"
wait = "50ms"
[[users.tasks]]
name = "idle"
action = "idle"

[[shapes]]
name = "Step"
[[shapes.stages]]
until = "1s"
users = 2
spawn_rate = 10
[[shapes.stages]]
until = "2500ms"
users = 4
spawn_rate = 10
"#;

#[test]
fn e2e_local_run_stops_at_time_limit() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let config = write_config(dir.path(), IDLE_USERS)?;

    let output = run_horde([
        "-f".as_ref(),
        config.as_os_str(),
        "-u".as_ref(),
        "4".as_ref(),
        "-r".as_ref(),
        "100".as_ref(),
        "-t".as_ref(),
        "1s".as_ref(),
        "--only-summary".as_ref(),
    ])?;
    let log = stderr_of(&output);
    if output.status.code() != Some(0) {
        return Err(format!("unexpected status {:?}:\n{}", output.status, log));
    }
    expect_log(&log, "All users spawned: ")?;
    expect_log(&log, "(4 total users)")?;
    expect_log(&log, "Time limit reached. Stopping")?;
    Ok(())
}

#[test]
fn e2e_local_failures_use_exit_code_on_error() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let config = write_config(dir.path(), FAILING_USERS)?;

    let output = run_horde([
        "-f".as_ref(),
        config.as_os_str(),
        "-u".as_ref(),
        "1".as_ref(),
        "-t".as_ref(),
        "1s".as_ref(),
        "--exit-code-on-error".as_ref(),
        "7".as_ref(),
        "--only-summary".as_ref(),
    ])?;
    if output.status.code() != Some(7) {
        return Err(format!(
            "unexpected status {:?}:\n{}",
            output.status,
            stderr_of(&output)
        ));
    }
    Ok(())
}

#[test]
fn e2e_local_unknown_user_class_is_fatal() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let config = write_config(dir.path(), IDLE_USERS)?;

    let output = run_horde([
        "-f".as_ref(),
        config.as_os_str(),
        "-t".as_ref(),
        "1s".as_ref(),
        "Ghost".as_ref(),
    ])?;
    let log = stderr_of(&output);
    if output.status.code() != Some(1) {
        return Err(format!("unexpected status {:?}:\n{}", output.status, log));
    }
    expect_log(&log, "Unknown User(s): Ghost")
}

#[test]
fn e2e_local_shape_drives_the_run() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let config = write_config(dir.path(), SHAPED_USERS)?;

    let output = run_horde([
        "-f".as_ref(),
        config.as_os_str(),
        "-u".as_ref(),
        "50".as_ref(),
        "--only-summary".as_ref(),
    ])?;
    let log = stderr_of(&output);
    if output.status.code() != Some(0) {
        return Err(format!("unexpected status {:?}:\n{}", output.status, log));
    }
    expect_log(&log, "Shape test starting.")?;
    expect_log(&log, "Shape test updating to 4 users at 10.00 spawn rate")?;
    expect_log(&log, "The following option(s) will be ignored: --users")?;
    expect_log(&log, "Shape test stopping")?;
    Ok(())
}

#[test]
fn e2e_local_interrupt_prints_summary_before_shutdown() -> Result<(), String> {
    let dir = tempdir().map_err(|err| format!("tempdir failed: {}", err))?;
    let config = write_config(dir.path(), IDLE_USERS)?;
    let config = config.to_string_lossy().into_owned();

    let mut run = spawn_horde([
        "-f",
        config.as_str(),
        "-u",
        "50",
        "-r",
        "5",
        "--only-summary",
    ])?;
    std::thread::sleep(Duration::from_millis(1500));
    interrupt(&run)?;

    let status = wait_for_exit(&mut run, Duration::from_secs(30))?;
    let log = read_stderr(&mut run)?;
    if status.code() != Some(0) {
        return Err(format!("unexpected status {:?}:\n{}", status, log));
    }
    expect_log(&log, "Exiting due to CTRL+C interruption")?;
    expect_log_order(&log, "Aggregated", "Shutting down (exit code 0)")?;
    if log.contains("All users spawned") {
        return Err(format!("interrupt arrived after the ramp:\n{}", log));
    }
    Ok(())
}
