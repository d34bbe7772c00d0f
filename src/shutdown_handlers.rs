use tokio::sync::broadcast;
use tracing::warn;

use crate::shutdown::{ShutdownReceiver, ShutdownSender};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Broadcast channel size for shutdown notifications (single signal fan-out).
const SHUTDOWN_CHANNEL_CAPACITY: usize = 1;
/// Exit code used when a second interrupt forces the process down.
pub const FORCED_EXIT_CODE: i32 = 130;

#[must_use]
pub fn shutdown_channel() -> (ShutdownSender, ShutdownReceiver) {
    broadcast::channel::<()>(SHUTDOWN_CHANNEL_CAPACITY)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// Start the graceful stop path.
    Graceful,
    /// Terminate right away.
    Force,
}

/// Two-state interrupt handling: the first interrupt stops gracefully, the
/// next one forces an exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InterruptLatch {
    #[default]
    Armed,
    Draining,
}

impl InterruptLatch {
    pub fn on_interrupt(&mut self) -> InterruptAction {
        match self {
            InterruptLatch::Armed => {
                *self = InterruptLatch::Draining;
                InterruptAction::Graceful
            }
            InterruptLatch::Draining => InterruptAction::Force,
        }
    }
}

/// Listens for SIGINT and SIGTERM for the lifetime of the runtime.
///
/// The first signal is broadcast on `shutdown_tx`; a second SIGINT exits the
/// process with [`FORCED_EXIT_CODE`].
pub fn setup_signal_shutdown_handler(shutdown_tx: &ShutdownSender) -> tokio::task::JoinHandle<()> {
    let shutdown_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let mut latch = InterruptLatch::default();

        #[cfg(unix)]
        let mut term_signal = match signal(SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(err) => {
                warn!("Failed to register SIGTERM handler: {}", err);
                None
            }
        };

        loop {
            #[cfg(unix)]
            let forced_allowed = tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        warn!("Failed to listen for CTRL+C: {}", err);
                        return;
                    }
                    true
                }
                () = async {
                    if let Some(signal) = term_signal.as_mut() {
                        signal.recv().await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                } => false,
            };

            #[cfg(not(unix))]
            let forced_allowed = match tokio::signal::ctrl_c().await {
                Ok(()) => true,
                Err(err) => {
                    warn!("Failed to listen for CTRL+C: {}", err);
                    return;
                }
            };

            match latch.on_interrupt() {
                InterruptAction::Graceful => {
                    drop(shutdown_tx.send(()));
                }
                InterruptAction::Force if forced_allowed => {
                    warn!("Forcing immediate shutdown");
                    std::process::exit(FORCED_EXIT_CODE);
                }
                InterruptAction::Force => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, AppResult};
    use std::future::Future;
    use std::time::Duration;

    const SIGNAL_HANDLER_SETTLE: Duration = Duration::from_millis(10);
    const SHUTDOWN_HANDLER_TIMEOUT: Duration = Duration::from_secs(1);

    fn run_async_test<F>(future: F) -> AppResult<()>
    where
        F: Future<Output = AppResult<()>>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| AppError::validation(format!("Failed to build runtime: {}", err)))?;
        runtime.block_on(future)
    }

    #[test]
    fn first_interrupt_is_graceful_second_forces() -> AppResult<()> {
        let mut latch = InterruptLatch::default();
        if latch.on_interrupt() != InterruptAction::Graceful {
            return Err(AppError::validation("First interrupt should be graceful"));
        }
        if latch != InterruptLatch::Draining {
            return Err(AppError::validation("Latch should be draining"));
        }
        if latch.on_interrupt() != InterruptAction::Force {
            return Err(AppError::validation("Second interrupt should force"));
        }
        Ok(())
    }

    #[test]
    fn signal_handler_can_be_cancelled() -> AppResult<()> {
        run_async_test(async {
            let (shutdown_tx, _) = shutdown_channel();
            let handle = setup_signal_shutdown_handler(&shutdown_tx);

            tokio::time::sleep(SIGNAL_HANDLER_SETTLE).await;
            handle.abort();
            match tokio::time::timeout(SHUTDOWN_HANDLER_TIMEOUT, handle).await {
                Ok(Err(err)) if err.is_cancelled() => Ok(()),
                Ok(Ok(())) => Err(AppError::validation("Signal handler returned on its own")),
                Ok(Err(err)) => Err(AppError::validation(format!(
                    "Signal handler join error: {}",
                    err
                ))),
                Err(_elapsed) => Err(AppError::validation("Timed out cancelling signal handler")),
            }
        })
    }
}
