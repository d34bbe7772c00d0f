use std::ffi::OsStr;
use std::io::Read;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Two idle user classes with equal weight.
pub const IDLE_USERS: &str = r#"
[[users]]
name = "Reader"
weight = 1
wait = "50ms"
[[users.tasks]]
name = "idle"
action = "idle"

[[users]]
name = "Writer"
weight = 1
wait = "50ms"
[[users.tasks]]
name = "idle"
action = "idle"
"#;

/// One user class whose only task always fails.
pub const FAILING_USERS: &str = r#"
[[users]]
name = "Broken"
wait = "20ms"
[[users.tasks]]
name = "explode"
action = "error"
message = "boom"
"#;

/// Write `contents` to `horde.toml` inside `dir`.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_config(dir: &Path, contents: &str) -> Result<PathBuf, String> {
    let path = dir.join("horde.toml");
    std::fs::write(&path, contents).map_err(|err| format!("write config failed: {}", err))?;
    Ok(path)
}

/// Run `horde` to completion, capturing its output.
///
/// # Errors
///
/// Returns an error if the process cannot be run.
pub fn run_horde<I, S>(args: I) -> Result<Output, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let bin = horde_bin()?;
    command(&bin)
        .args(args)
        .output()
        .map_err(|err| format!("run horde failed: {}", err))
}

/// Spawn `horde` with stdout and stderr captured.
///
/// # Errors
///
/// Returns an error if the process cannot be started.
pub fn spawn_horde<I, S>(args: I) -> Result<Child, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let bin = horde_bin()?;
    command(&bin)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| format!("spawn horde failed: {}", err))
}

/// Spawn `horde` with its output discarded.
///
/// # Errors
///
/// Returns an error if the process cannot be started.
pub fn spawn_horde_quiet<I, S>(args: I) -> Result<Child, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let bin = horde_bin()?;
    command(&bin)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| format!("spawn horde failed: {}", err))
}

/// Wait for a child process to exit.
///
/// # Errors
///
/// Returns an error if waiting fails or the timeout is exceeded.
pub fn wait_for_exit(child: &mut Child, timeout: Duration) -> Result<ExitStatus, String> {
    let start = Instant::now();
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|err| format!("wait failed: {}", err))?
        {
            return Ok(status);
        }
        if start.elapsed() > timeout {
            drop(child.kill());
            drop(child.wait());
            return Err("process timed out".to_owned());
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Read captured stderr from an exited child.
///
/// # Errors
///
/// Returns an error if the stream cannot be read.
pub fn read_stderr(child: &mut Child) -> Result<String, String> {
    let mut stderr = String::new();
    if let Some(mut err_out) = child.stderr.take() {
        err_out
            .read_to_string(&mut stderr)
            .map_err(|err| format!("read stderr failed: {}", err))?;
    }
    Ok(stderr)
}

/// Stderr of a finished run, lossily decoded.
#[must_use]
pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Pick an available local TCP port.
///
/// # Errors
///
/// Returns an error if a local port cannot be allocated.
pub fn pick_port() -> Result<u16, String> {
    TcpListener::bind("127.0.0.1:0")
        .map_err(|err| format!("bind port failed: {}", err))?
        .local_addr()
        .map_err(|err| format!("port addr failed: {}", err))
        .map(|addr| addr.port())
}

/// Fail with the captured log when `needle` is missing from `log`.
///
/// # Errors
///
/// Returns an error naming the missing line.
pub fn expect_log(log: &str, needle: &str) -> Result<(), String> {
    if log.contains(needle) {
        Ok(())
    } else {
        Err(format!("missing '{}' in output:\n{}", needle, log))
    }
}

fn command(bin: &str) -> Command {
    let mut command = Command::new(bin);
    command
        .env("HORDE_LOG", "info")
        .env_remove("RUST_LOG")
        .env_remove("HORDE_CONFIG")
        .arg("--no-color");
    command
}

fn horde_bin() -> Result<String, String> {
    option_env!("CARGO_BIN_EXE_horde").map_or_else(
        || Err("CARGO_BIN_EXE_horde missing at compile time.".to_owned()),
        |path| Ok(path.to_owned()),
    )
}

/// Send SIGINT to a running child.
///
/// # Errors
///
/// Returns an error if the signal cannot be delivered.
pub fn interrupt(child: &Child) -> Result<(), String> {
    let status = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .map_err(|err| format!("kill failed: {}", err))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("kill exited with {}", status))
    }
}

/// Fail unless `first` appears in `log` before `second`.
///
/// # Errors
///
/// Returns an error naming the lines when either is missing or out of order.
pub fn expect_log_order(log: &str, first: &str, second: &str) -> Result<(), String> {
    match (log.rfind(first), log.find(second)) {
        (Some(first_at), Some(second_at)) if first_at < second_at => Ok(()),
        (Some(_), Some(_)) | (None, _) | (_, None) => Err(format!(
            "expected '{}' before '{}' in output:\n{}",
            first, second, log
        )),
    }
}
