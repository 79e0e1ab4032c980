// P2P networking

mod message;
mod node;
mod peer;
mod transport;

pub use message::{Message, MessageType};
pub use node::{BroadcastReport, Node};
pub use peer::Peer;
pub use transport::{PeerError, PeerTransport, TcpTransport};

#[cfg(test)]
pub(crate) use transport::mock;
