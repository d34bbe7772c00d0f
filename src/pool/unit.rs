use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::users::{TaskError, User, UserClass, UserContext};

/// Lower bound between a unit failure and its restart.
const MIN_RESTART_DELAY: Duration = Duration::from_millis(10);
const FAILURE_KIND: &str = "ERROR";

pub(super) struct UnitHandle {
    id: u64,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl UnitHandle {
    pub(super) fn request_stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub(super) fn abort(&self) {
        self.join.abort();
    }

    pub(super) fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub(super) async fn wait(&mut self) {
        match (&mut self.join).await {
            Err(err) if !err.is_cancelled() => {
                debug!("User unit {} ended abnormally: {}", self.id, err);
            }
            Ok(()) | Err(_) => {}
        }
    }
}

pub(super) fn spawn_unit(class: UserClass, ctx: UserContext) -> UnitHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let id = ctx.unit_id();
    let join = tokio::spawn(run_unit(class, ctx, stop_rx));
    UnitHandle { id, stop_tx, join }
}

enum UnitExit {
    Stopped,
    Failed { error: TaskError, backoff: Duration },
}

async fn run_unit(class: UserClass, ctx: UserContext, mut stop_rx: watch::Receiver<bool>) {
    loop {
        let outcome = AssertUnwindSafe(unit_lifecycle(&class, &ctx, &mut stop_rx))
            .catch_unwind()
            .await;
        let backoff = match outcome {
            Ok(UnitExit::Stopped) => return,
            Ok(UnitExit::Failed { error, backoff }) => {
                warn!("{} unit {} failed: {}", class.name(), ctx.unit_id(), error);
                ctx.record_failure(FAILURE_KIND, class.name(), Duration::ZERO, &error.message);
                backoff
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("{} unit {} panicked: {}", class.name(), ctx.unit_id(), message);
                ctx.record_failure(FAILURE_KIND, class.name(), Duration::ZERO, &message);
                MIN_RESTART_DELAY
            }
        };
        if !pause(backoff.max(MIN_RESTART_DELAY), &mut stop_rx).await {
            return;
        }
    }
}

async fn unit_lifecycle(
    class: &UserClass,
    ctx: &UserContext,
    stop_rx: &mut watch::Receiver<bool>,
) -> UnitExit {
    let mut user = class.create();
    if let Err(error) = user.on_start(ctx).await {
        let backoff = user.wait_time();
        return UnitExit::Failed { error, backoff };
    }
    loop {
        if stop_requested(stop_rx) {
            return finish(user.as_mut(), ctx).await;
        }
        if let Err(error) = user.run_task(ctx).await {
            let backoff = user.wait_time();
            return UnitExit::Failed { error, backoff };
        }
        let wait = user.wait_time();
        if !pause(wait, stop_rx).await {
            return finish(user.as_mut(), ctx).await;
        }
    }
}

async fn finish(user: &mut dyn User, ctx: &UserContext) -> UnitExit {
    user.on_stop(ctx).await;
    UnitExit::Stopped
}

fn stop_requested(stop_rx: &watch::Receiver<bool>) -> bool {
    *stop_rx.borrow()
}

/// Sleeps unless a stop arrives first. Returns false when stopping.
async fn pause(wait: Duration, stop_rx: &mut watch::Receiver<bool>) -> bool {
    if stop_requested(stop_rx) {
        return false;
    }
    if wait.is_zero() {
        tokio::task::yield_now().await;
        return !stop_requested(stop_rx);
    }
    tokio::select! {
        () = tokio::time::sleep(wait) => !stop_requested(stop_rx),
        changed = stop_rx.changed() => changed.is_ok() && !stop_requested(stop_rx),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unit panicked".to_owned()
    }
}
