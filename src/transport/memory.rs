use tokio::sync::mpsc;
use tracing::debug;

use super::bus::{LinkEvent, LinkSender, WorkerEndpoint};
use super::protocol::WireMessage;

/// Connects an in-process worker to a master endpoint.
///
/// The first message the worker sends must be a registration; anything
/// before it is dropped, the same as on a TCP link.
#[must_use]
pub fn connect(link: &LinkSender) -> WorkerEndpoint {
    let (to_master_tx, mut to_master_rx) = mpsc::unbounded_channel::<WireMessage>();
    let (to_worker_tx, to_worker_rx) = mpsc::unbounded_channel::<WireMessage>();
    let link = link.clone();
    let link_id = link.next_link_id();

    tokio::spawn(async move {
        let mut worker_id: Option<String> = None;
        let mut outbound = Some(to_worker_tx);
        while let Some(message) = to_master_rx.recv().await {
            if let Some(id) = worker_id.as_deref() {
                let event = LinkEvent::Message {
                    worker_id: id.to_owned(),
                    message,
                };
                if !link.send(event) {
                    break;
                }
                continue;
            }
            let kind = message.kind();
            let WireMessage::Register(register) = message else {
                debug!("Dropping {} sent before registration", kind);
                continue;
            };
            worker_id = Some(register.worker_id.clone());
            let Some(outbound) = outbound.take() else {
                break;
            };
            if !link.send(LinkEvent::Attached {
                link_id,
                register,
                outbound,
                writer: None,
            }) {
                break;
            }
        }
        if let Some(worker_id) = worker_id
            && !link.send(LinkEvent::Detached { worker_id, link_id })
        {
            debug!("Master endpoint gone before detach");
        }
    });

    WorkerEndpoint::new(to_master_tx, to_worker_rx, None)
}
