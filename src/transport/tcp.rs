use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, DistributedError};
use crate::shutdown::ShutdownReceiver;

use super::bus::{LinkEvent, LinkSender, WorkerEndpoint};
use super::io::{read_message, send_message};
use super::protocol::WireMessage;

const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Binds the master's listening socket.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn bind(addr: &str) -> AppResult<TcpListener> {
    TcpListener::bind(addr).await.map_err(|err| {
        AppError::distributed(DistributedError::Bind {
            addr: addr.to_owned(),
            source: err,
        })
    })
}

/// Accepts worker connections until shutdown, attaching each to the master.
pub async fn serve(listener: TcpListener, link: LinkSender, mut shutdown_rx: ShutdownReceiver) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("Accepted connection from {}", peer);
                        let link = link.clone();
                        tokio::spawn(async move {
                            if let Err(err) = attach_worker(stream, link).await {
                                warn!("Rejected connection from {}: {}", peer, err);
                            }
                        });
                    }
                    Err(err) => {
                        warn!("Failed to accept connection: {}", err);
                    }
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }
}

async fn attach_worker(stream: TcpStream, link: LinkSender) -> AppResult<()> {
    if let Err(err) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY: {}", err);
    }
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let register = match timeout(REGISTER_TIMEOUT, read_message(&mut reader)).await {
        Ok(result) => match result? {
            WireMessage::Register(message) => message,
            WireMessage::Ack(_)
            | WireMessage::Spawn(_)
            | WireMessage::Stop
            | WireMessage::Quit(_)
            | WireMessage::Heartbeat(_)
            | WireMessage::StatsReport(_)
            | WireMessage::Ready(_) => {
                return Err(AppError::distributed(DistributedError::ExpectedRegister));
            }
        },
        Err(_elapsed) => {
            return Err(AppError::distributed(DistributedError::RegisterTimeout));
        }
    };

    let worker_id = register.worker_id.clone();
    let link_id = link.next_link_id();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<WireMessage>();
    let writer = tokio::spawn(write_loop(write_half, out_rx));
    if !link.send(LinkEvent::Attached {
        link_id,
        register,
        outbound: out_tx,
        writer: Some(writer),
    }) {
        return Ok(());
    }

    loop {
        match read_message(&mut reader).await {
            Ok(message) => {
                let event = LinkEvent::Message {
                    worker_id: worker_id.clone(),
                    message,
                };
                if !link.send(event) {
                    return Ok(());
                }
            }
            Err(err) => {
                debug!("Connection to worker {} ended: {}", worker_id, err);
                break;
            }
        }
    }
    if !link.send(LinkEvent::Detached { worker_id, link_id }) {
        debug!("Master endpoint gone before detach");
    }
    Ok(())
}

/// Connects a worker to the master at `addr`.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(addr: &str) -> AppResult<WorkerEndpoint> {
    let stream = TcpStream::connect(addr).await.map_err(|err| {
        AppError::distributed(DistributedError::Connection {
            addr: addr.to_owned(),
            source: err,
        })
    })?;
    if let Err(err) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY: {}", err);
    }
    let (read_half, write_half) = stream.into_split();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<WireMessage>();
    let writer = tokio::spawn(write_loop(write_half, out_rx));

    let (in_tx, in_rx) = mpsc::unbounded_channel::<WireMessage>();
    let mut reader = BufReader::new(read_half);
    tokio::spawn(async move {
        loop {
            match read_message(&mut reader).await {
                Ok(message) => {
                    if in_tx.send(message).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!("Connection to master ended: {}", err);
                    break;
                }
            }
        }
    });

    Ok(WorkerEndpoint::new(out_tx, in_rx, Some(writer)))
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut out_rx: mpsc::UnboundedReceiver<WireMessage>,
) {
    while let Some(message) = out_rx.recv().await {
        if let Err(err) = send_message(&mut write_half, &message).await {
            debug!("Stopped writing {}: {}", message.kind(), err);
            break;
        }
    }
}
