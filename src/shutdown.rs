use tokio::sync::broadcast;

/// Fan-out of the first interrupt to every runner loop.
pub type ShutdownSender = broadcast::Sender<()>;
pub type ShutdownReceiver = broadcast::Receiver<()>;
