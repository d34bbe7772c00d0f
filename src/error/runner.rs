use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{hook} hook failed: {message}")]
    HookFailed { hook: &'static str, message: String },
    #[error("{hook} hook requested exit with code {code}.")]
    HookExit { hook: &'static str, code: i32 },
    #[error("Unknown user class '{name}' in spawn target.")]
    UnknownClassInTarget { name: String },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
