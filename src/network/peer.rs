// Peer connection management

use crate::network::message::HEADER_LEN;
use crate::network::{Message, PeerError};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Peer connection
pub struct Peer {
    addr: SocketAddr,
    stream: TcpStream,
}

impl Peer {
    /// Wrap an accepted TCP stream
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self { addr, stream }
    }

    /// Connect to a peer
    pub async fn connect(addr: SocketAddr) -> Result<Self, PeerError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| PeerError::Unreachable { peer: addr, source })?;

        Ok(Self::new(stream, addr))
    }

    /// Send a message to the peer
    pub async fn send_message(&mut self, message: &Message) -> Result<(), PeerError> {
        let data = message.serialize();

        self.stream
            .write_all(&data)
            .await
            .map_err(|source| self.io_error(source))?;

        self.stream.flush().await.map_err(|source| self.io_error(source))?;

        Ok(())
    }

    /// Receive a message from the peer
    pub async fn receive_message(&mut self) -> Result<Message, PeerError> {
        // Read message header (16 bytes: 12 for type + 4 for length)
        let mut header = [0u8; HEADER_LEN];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(|source| self.io_error(source))?;

        let (msg_type, payload_len) = Message::parse_header(&header)?;

        // Read payload
        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            self.stream
                .read_exact(&mut payload)
                .await
                .map_err(|source| self.io_error(source))?;
        }

        Ok(Message::from_payload(msg_type, &payload)?)
    }

    /// Get peer address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn io_error(&self, source: std::io::Error) -> PeerError {
        PeerError::Unreachable {
            peer: self.addr,
            source,
        }
    }
}
