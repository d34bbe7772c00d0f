use super::*;
use crate::error::AppResult;
use crate::shutdown_handlers::shutdown_channel;
use std::future::Future;

fn run_async_test<F>(future: F) -> AppResult<()>
where
    F: Future<Output = AppResult<()>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::distributed(format!("Failed to build runtime: {}", err)))?;
    runtime.block_on(future)
}

fn os_args(values: &[&str]) -> Vec<OsString> {
    values.iter().map(OsString::from).collect()
}

#[test]
fn worker_args_drop_parent_options() -> AppResult<()> {
    let parent = os_args(&[
        "-f",
        "load.toml",
        "--master",
        "--processes",
        "-1",
        "--expect-workers=4",
        "--master-bind-port",
        "6000",
        "-u",
        "10",
        "WebUser",
    ]);
    let args = worker_command_args(&parent, "127.0.0.1", 6000);
    let expected = os_args(&[
        "-f",
        "load.toml",
        "-u",
        "10",
        "WebUser",
        "--worker",
        "--child-process",
        "--master-host",
        "127.0.0.1",
        "--master-port",
        "6000",
    ]);
    if args != expected {
        return Err(AppError::distributed(format!("Unexpected args: {:?}", args)));
    }
    Ok(())
}

#[test]
fn worker_args_replace_master_address() -> AppResult<()> {
    let parent = os_args(&[
        "--worker",
        "--master-host",
        "10.0.0.5",
        "--master-port=7000",
        "--processes",
        "2",
    ]);
    let args = worker_command_args(&parent, "10.0.0.5", 7000);
    let expected = os_args(&[
        "--worker",
        "--child-process",
        "--master-host",
        "10.0.0.5",
        "--master-port",
        "7000",
    ]);
    if args != expected {
        return Err(AppError::distributed(format!("Unexpected args: {:?}", args)));
    }
    Ok(())
}

#[test]
fn exit_tally_keeps_first_failure() -> AppResult<()> {
    let mut tally = ExitTally::default();
    tally.record(Some(0), None, false);
    if tally.has_failure() {
        return Err(AppError::distributed("Clean exit counted as failure"));
    }
    tally.record(Some(42), None, false);
    tally.record(Some(7), None, false);
    if tally.exit_code() != 42 {
        return Err(AppError::distributed(format!(
            "Expected 42, got {}",
            tally.exit_code()
        )));
    }
    Ok(())
}

#[test]
fn exit_tally_maps_unrequested_signals() -> AppResult<()> {
    let mut requested = ExitTally::default();
    requested.record(None, Some(15), true);
    if requested.exit_code() != 0 {
        return Err(AppError::distributed("Requested termination is not a failure"));
    }

    let mut killed = ExitTally::default();
    killed.record(None, Some(9), false);
    if killed.exit_code() != 137 {
        return Err(AppError::distributed(format!(
            "Expected 137, got {}",
            killed.exit_code()
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn shell(script: &str, count: usize) -> ProcessSupervisor {
    ProcessSupervisor::new(PathBuf::from("sh"), os_args(&["-c", script]), count)
        .with_ready_timeout(Duration::from_secs(5))
}

#[cfg(unix)]
#[test]
fn child_exit_code_is_surfaced() -> AppResult<()> {
    run_async_test(async {
        let supervisor = shell(r#"echo '{"type":"ready","pid":1}'; exit 42"#, 2);
        let (_shutdown_tx, shutdown_rx) = shutdown_channel();
        let code = supervisor.run(shutdown_rx).await?;
        if code != 42 {
            return Err(AppError::distributed(format!("Expected 42, got {}", code)));
        }
        Ok(())
    })
}

#[cfg(unix)]
#[test]
fn ready_children_exiting_cleanly_exit_zero() -> AppResult<()> {
    run_async_test(async {
        let supervisor = shell(r#"echo hello; echo '{"type":"ready","pid":1}'"#, 3);
        let (_shutdown_tx, shutdown_rx) = shutdown_channel();
        let code = supervisor.run(shutdown_rx).await?;
        if code != 0 {
            return Err(AppError::distributed(format!("Expected 0, got {}", code)));
        }
        Ok(())
    })
}

#[cfg(unix)]
#[test]
fn child_exiting_before_ready_is_an_error() -> AppResult<()> {
    run_async_test(async {
        let supervisor = shell("exit 0", 1);
        let (_shutdown_tx, shutdown_rx) = shutdown_channel();
        match supervisor.run(shutdown_rx).await {
            Err(AppError::Distributed(DistributedError::ChildExitedBeforeReady { .. })) => Ok(()),
            other => Err(AppError::distributed(format!("Unexpected result: {:?}", other))),
        }
    })
}

#[cfg(unix)]
#[test]
fn shutdown_is_forwarded_to_children() -> AppResult<()> {
    run_async_test(async {
        let supervisor = shell(r#"echo '{"type":"ready","pid":1}'; exec sleep 30"#, 2);
        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let interrupt = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let _sent = shutdown_tx.send(());
        };
        let (result, ()) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(10), supervisor.run(shutdown_rx)),
            interrupt
        );
        let code = result.map_err(|_elapsed| AppError::distributed("Children were not stopped"))??;
        if code != 0 {
            return Err(AppError::distributed(format!("Expected 0, got {}", code)));
        }
        Ok(())
    })
}
