use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistributedError {
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to connect to master {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Gave up waiting for workers to connect (expected {expected}, got {actual}).")]
    WorkerWaitTimeout { expected: usize, actual: usize },
    #[error("Connection closed.")]
    ConnectionClosed,
    #[error("Wire message exceeded max size ({max_bytes} bytes).")]
    WireMessageTooLarge { max_bytes: usize },
    #[error("Wire message was not valid UTF-8: {source}")]
    WireMessageInvalidUtf8 {
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("Expected register as the first message from a worker.")]
    ExpectedRegister,
    #[error("Timed out waiting for worker registration.")]
    RegisterTimeout,
    #[error("Master connection closed.")]
    MasterConnectionClosed,
    #[error("Didn't get heartbeat from master in over {timeout_secs}s, shutting down.")]
    MasterHeartbeatTimeout { timeout_secs: u64 },
    #[error("Serialization error during {context}: {source}")]
    Serialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Deserialization error during {context}: {source}")]
    Deserialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Histogram error during {context}: {message}")]
    Histogram {
        context: &'static str,
        message: String,
    },
    #[error("Failed to spawn worker process: {source}")]
    SpawnChild {
        #[source]
        source: std::io::Error,
    },
    #[error("Worker process {pid} exited before reporting ready ({status}).")]
    ChildExitedBeforeReady { pid: u32, status: String },
    #[error("Timed out waiting for {expected} worker processes to report ready (got {actual}).")]
    ChildReadyTimeout { expected: usize, actual: usize },
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
