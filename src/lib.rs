// Time-verified proof-of-work node
// Miners produce blocks whose timestamps are attested by a quorum of peers

pub mod chain;
pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use chain::{NodeState, SharedState};
pub use cli::{Cli, CliHandler, Commands};
pub use config::{ConsensusParams, NodeConfig};
pub use consensus::{BlockValidator, MiningEngine, MiningError, ValidationError};
pub use core::{Block, Hash256, MinerKey, Transaction};
pub use network::{Message, Node, Peer, TcpTransport};
pub use storage::{Storage, StorageError};
