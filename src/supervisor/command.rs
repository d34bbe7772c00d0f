use std::ffi::{OsStr, OsString};

/// Options that only make sense for the parent and take a value.
const PARENT_VALUE_FLAGS: [&str; 7] = [
    "--processes",
    "--master-host",
    "--master-port",
    "--master-bind-host",
    "--master-bind-port",
    "--expect-workers",
    "--expect-workers-max-wait",
];
/// Parent-only switches.
const PARENT_SWITCHES: [&str; 3] = ["--master", "--worker", "--child-process"];

/// Arguments for a forked worker: the parent's own arguments without the
/// role and process options, plus the worker role pointed at the master.
///
/// `parent_args` excludes the program name.
#[must_use]
pub fn worker_command_args(
    parent_args: &[OsString],
    master_host: &str,
    master_port: u16,
) -> Vec<OsString> {
    let mut kept = Vec::with_capacity(parent_args.len().saturating_add(6));
    let mut args = parent_args.iter();
    while let Some(arg) = args.next() {
        match classify(arg) {
            ArgKind::Keep => kept.push(arg.clone()),
            ArgKind::DropSwitch | ArgKind::DropInline => {}
            ArgKind::DropWithValue => {
                args.next();
            }
        }
    }
    kept.extend(
        [
            "--worker",
            "--child-process",
            "--master-host",
            master_host,
            "--master-port",
        ]
        .into_iter()
        .map(OsString::from),
    );
    kept.push(OsString::from(master_port.to_string()));
    kept
}

enum ArgKind {
    Keep,
    DropSwitch,
    /// `--flag=value`
    DropInline,
    /// `--flag value`
    DropWithValue,
}

fn classify(arg: &OsStr) -> ArgKind {
    let Some(text) = arg.to_str() else {
        return ArgKind::Keep;
    };
    if PARENT_SWITCHES.contains(&text) {
        return ArgKind::DropSwitch;
    }
    if PARENT_VALUE_FLAGS.contains(&text) {
        return ArgKind::DropWithValue;
    }
    match text.split_once('=') {
        Some((flag, _)) if PARENT_VALUE_FLAGS.contains(&flag) => ArgKind::DropInline,
        Some(_) | None => ArgKind::Keep,
    }
}
