//! Message bus between one master and its workers, over TCP or in process.
mod bus;
mod io;
pub mod memory;
mod protocol;
pub mod tcp;


pub use bus::{BusEvent, LinkSender, MasterEndpoint, SELF_ID, WorkerEndpoint};
pub use io::{decode_line, encode_line, read_message, send_message};
pub use protocol::{
    AckMessage, HeartbeatMessage, QuitMessage, ReadyMessage, RegisterMessage, SpawnMessage,
    StatsReportMessage, WireMessage,
};
