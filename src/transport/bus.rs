use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::DistributedError;

use super::protocol::{RegisterMessage, WireMessage};

/// Sender identity used for messages the master delivers to itself.
pub const SELF_ID: &str = "self";

pub(super) type Outbound = mpsc::UnboundedSender<WireMessage>;

/// How long closing an endpoint waits for queued messages to be written.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection lifecycle reported by a link to the master endpoint.
#[derive(Debug)]
pub(super) enum LinkEvent {
    Attached {
        link_id: u64,
        register: RegisterMessage,
        outbound: Outbound,
        writer: Option<JoinHandle<()>>,
    },
    Message {
        worker_id: String,
        message: WireMessage,
    },
    Detached {
        worker_id: String,
        link_id: u64,
    },
}

/// Handle given to acceptors so they can attach worker links to a master.
#[derive(Debug, Clone)]
pub struct LinkSender {
    events: mpsc::UnboundedSender<LinkEvent>,
    next_link_id: Arc<AtomicU64>,
}

impl LinkSender {
    pub(super) fn next_link_id(&self) -> u64 {
        self.next_link_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(super) fn send(&self, event: LinkEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

/// What the master sees on its side of the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Message { from: String, message: WireMessage },
    /// The worker's connection went away.
    Detached { from: String },
}

/// The master's side of the bus: one link per registered worker.
#[derive(Debug)]
pub struct MasterEndpoint {
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    next_link_id: Arc<AtomicU64>,
    links: BTreeMap<String, Link>,
}

#[derive(Debug)]
struct Link {
    link_id: u64,
    outbound: Outbound,
    writer: Option<JoinHandle<()>>,
}

impl Default for MasterEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterEndpoint {
    #[must_use]
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events_tx,
            events_rx,
            next_link_id: Arc::new(AtomicU64::new(0)),
            links: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn link_sender(&self) -> LinkSender {
        LinkSender {
            events: self.events_tx.clone(),
            next_link_id: Arc::clone(&self.next_link_id),
        }
    }

    /// Sends to every attached worker.
    pub fn publish(&mut self, message: &WireMessage) {
        self.links
            .retain(|_, link| link.outbound.send(message.clone()).is_ok());
    }

    /// Sends to one worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker is not attached.
    pub fn send_to(&mut self, worker_id: &str, message: WireMessage) -> Result<(), DistributedError> {
        let sent = self
            .links
            .get(worker_id)
            .is_some_and(|link| link.outbound.send(message).is_ok());
        if sent {
            Ok(())
        } else {
            self.links.remove(worker_id);
            Err(DistributedError::ConnectionClosed)
        }
    }

    /// Queues a message as if it had arrived from a worker named [`SELF_ID`].
    pub fn deliver_to_self(&self, message: WireMessage) {
        if self
            .events_tx
            .send(LinkEvent::Message {
                worker_id: SELF_ID.to_owned(),
                message,
            })
            .is_err()
        {
            debug!("Master inbox closed, dropping self-delivered message");
        }
    }

    #[must_use]
    pub fn is_attached(&self, worker_id: &str) -> bool {
        self.links.contains_key(worker_id)
    }

    /// Drops the link to a worker; later messages from it still arrive.
    pub fn detach(&mut self, worker_id: &str) {
        self.links.remove(worker_id);
    }

    /// Waits for the next event. Returns `None` once no link can produce more.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.events_rx.recv().await? {
                LinkEvent::Attached {
                    link_id,
                    register,
                    outbound,
                    writer,
                } => {
                    let from = register.worker_id.clone();
                    self.links.insert(
                        from.clone(),
                        Link {
                            link_id,
                            outbound,
                            writer,
                        },
                    );
                    return Some(BusEvent::Message {
                        from,
                        message: WireMessage::Register(register),
                    });
                }
                LinkEvent::Message { worker_id, message } => {
                    return Some(BusEvent::Message {
                        from: worker_id,
                        message,
                    });
                }
                LinkEvent::Detached { worker_id, link_id } => {
                    let current = self.links.get(&worker_id).map(|link| link.link_id);
                    if current.is_some_and(|id| id != link_id) {
                        debug!("Ignoring stale detach for worker {}", worker_id);
                        continue;
                    }
                    self.links.remove(&worker_id);
                    return Some(BusEvent::Detached { from: worker_id });
                }
            }
        }
    }

    /// Closes every link after its queued messages are written.
    pub async fn close(mut self) {
        let writers: Vec<JoinHandle<()>> = std::mem::take(&mut self.links)
            .into_values()
            .filter_map(|link| link.writer)
            .collect();
        flush_writers(writers).await;
    }
}

async fn flush_writers(writers: Vec<JoinHandle<()>>) {
    if writers.is_empty() {
        return;
    }
    let waiting = futures_util::future::join_all(writers);
    if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, waiting).await.is_err() {
        debug!("Timed out flushing outbound messages");
    }
}

/// A worker's side of the bus.
#[derive(Debug)]
pub struct WorkerEndpoint {
    outbound: Outbound,
    inbound: mpsc::UnboundedReceiver<WireMessage>,
    writer: Option<JoinHandle<()>>,
}

impl WorkerEndpoint {
    pub(super) const fn new(
        outbound: Outbound,
        inbound: mpsc::UnboundedReceiver<WireMessage>,
        writer: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            writer,
        }
    }

    /// Queues a message for the master.
    ///
    /// # Errors
    ///
    /// Returns an error once the connection is gone.
    pub fn send(&self, message: WireMessage) -> Result<(), DistributedError> {
        self.outbound
            .send(message)
            .map_err(|_closed| DistributedError::MasterConnectionClosed)
    }

    /// Next message from the master; `None` when the connection closed.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.inbound.recv().await
    }

    /// Closes the link after queued messages are written.
    pub async fn close(self) {
        let WorkerEndpoint {
            outbound, writer, ..
        } = self;
        drop(outbound);
        flush_writers(writer.into_iter().collect()).await;
    }
}
