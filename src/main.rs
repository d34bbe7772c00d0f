use std::process::ExitCode;

fn main() -> ExitCode {
    let code = match horde::entry::run() {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{}", err);
            err.exit_code()
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
