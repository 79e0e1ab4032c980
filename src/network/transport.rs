// Client side of the peer protocol

use crate::consensus::TimeVerdict;
use crate::core::{Block, CodecError, MinerKey, Transaction};
use crate::network::{Message, MessageType, Peer};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

/// Failure of a single peer call. Attestation collection and broadcast
/// record these per peer and carry on.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer {peer} unreachable: {source}")]
    Unreachable {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("peer {0} timed out")]
    Timeout(SocketAddr),
    #[error("malformed reply: {0}")]
    Malformed(#[from] CodecError),
    #[error("unexpected {0:?} reply")]
    UnexpectedReply(MessageType),
    #[error("peer {0} has not mined a block")]
    Ineligible(SocketAddr),
    #[error("peer {0} declined the timestamp")]
    Declined(SocketAddr),
    #[error("attestation from {0} does not verify")]
    BadSignature(SocketAddr),
    #[error("peer rejected the message: {0}")]
    Rejected(String),
}

/// Calls a node makes on its peers
pub trait PeerTransport: Send + Sync + 'static {
    /// Public key the peer signs with
    fn identify(&self, peer: SocketAddr) -> impl Future<Output = Result<MinerKey, PeerError>> + Send;

    /// Ask the peer to attest `block`'s timestamp
    fn verify_time(
        &self,
        peer: SocketAddr,
        block: &Block,
    ) -> impl Future<Output = Result<TimeVerdict, PeerError>> + Send;

    fn send_block(&self, peer: SocketAddr, block: &Block) -> impl Future<Output = Result<(), PeerError>> + Send;

    fn send_transaction(
        &self,
        peer: SocketAddr,
        tx: &Transaction,
    ) -> impl Future<Output = Result<(), PeerError>> + Send;
}

/// TCP transport: one connection per request, bounded by `timeout`
#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Send one request and wait for its reply
    async fn call(&self, addr: SocketAddr, request: Message) -> Result<Message, PeerError> {
        let exchange = async {
            let mut peer = Peer::connect(addr).await?;
            peer.send_message(&request).await?;
            peer.receive_message().await
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| PeerError::Timeout(addr))?
    }

    fn expect_ack(reply: Message) -> Result<(), PeerError> {
        match reply {
            Message::Ack => Ok(()),
            Message::Reject(reason) => Err(PeerError::Rejected(reason)),
            other => Err(PeerError::UnexpectedReply(other.message_type())),
        }
    }
}

impl PeerTransport for TcpTransport {
    async fn identify(&self, peer: SocketAddr) -> Result<MinerKey, PeerError> {
        match self.call(peer, Message::Identify).await? {
            Message::Identity(key) => Ok(key),
            other => Err(PeerError::UnexpectedReply(other.message_type())),
        }
    }

    async fn verify_time(&self, peer: SocketAddr, block: &Block) -> Result<TimeVerdict, PeerError> {
        match self.call(peer, Message::VerifyTime(block.clone())).await? {
            Message::TimeVerified(attestation) => Ok(TimeVerdict::Attested(attestation)),
            Message::TimeRejected => Ok(TimeVerdict::Declined),
            other => Err(PeerError::UnexpectedReply(other.message_type())),
        }
    }

    async fn send_block(&self, peer: SocketAddr, block: &Block) -> Result<(), PeerError> {
        let reply = self.call(peer, Message::Block(block.clone())).await?;
        Self::expect_ack(reply)
    }

    async fn send_transaction(&self, peer: SocketAddr, tx: &Transaction) -> Result<(), PeerError> {
        let reply = self.call(peer, Message::Tx(tx.clone())).await?;
        Self::expect_ack(reply)
    }
}
