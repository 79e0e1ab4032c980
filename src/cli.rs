// CLI commands

use crate::chain::NodeState;
use crate::config::{ConsensusParams, NodeConfig};
use crate::consensus::{DifficultyEngine, RewardSchedule, quorum_size};
use crate::core::{MinerKey, Transaction, now_nanos};
use crate::network::{Node, PeerTransport, TcpTransport};
use crate::storage::Storage;
use crate::wallet::Identity;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "timechain")]
#[command(about = "Proof-of-work node with peer time verification", long_about = None)]
pub struct Cli {
    /// Directory holding the chain database and the node identity
    #[arg(long, global = true, default_value = "./data")]
    pub data_dir: PathBuf,

    /// JSON file overriding consensus parameters
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a node
    Node {
        /// Produce blocks from the local pool
        #[arg(long)]
        mine: bool,

        /// Port to accept peer connections on
        #[arg(short, long, default_value = "8333")]
        port: u16,

        /// Peer address (repeatable)
        #[arg(long = "peer")]
        peers: Vec<SocketAddr>,
    },

    /// Show chain info from the local database
    Info,

    /// Print this node's miner key, creating it if needed
    Identity,

    /// Submit a transaction to a running node
    Send {
        /// Node to submit to
        peer: SocketAddr,
        /// Recipient miner key (hex)
        recipient: String,
        /// Amount
        amount: u64,
    },
}

/// CLI handler
pub struct CliHandler {
    data_dir: PathBuf,
    params: ConsensusParams,
}

impl CliHandler {
    /// Create a new CLI handler
    pub fn new(data_dir: &Path, config: Option<&Path>) -> Result<Self, String> {
        let params = match config {
            Some(path) => {
                log::info!("Loading consensus parameters from {}", path.display());
                ConsensusParams::load(path)?
            }
            None => ConsensusParams::default(),
        };

        std::fs::create_dir_all(data_dir)
            .map_err(|e| format!("Failed to create {}: {}", data_dir.display(), e))?;

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            params,
        })
    }

    /// Handle CLI command
    pub async fn handle(&self, command: Commands) -> Result<(), String> {
        match command {
            Commands::Node { mine, port, peers } => self.run_node(mine, port, peers).await,
            Commands::Info => self.info(),
            Commands::Identity => self.identity(),
            Commands::Send {
                peer,
                recipient,
                amount,
            } => self.send(peer, &recipient, amount).await,
        }
    }

    fn load_identity(&self) -> Result<Identity, String> {
        Identity::load_or_create(self.data_dir.join("identity.json"))
    }

    fn open_storage(&self) -> Result<Storage, String> {
        Storage::new(self.data_dir.join("chain")).map_err(|e| format!("Failed to open storage: {}", e))
    }

    /// Stored state, or a fresh chain holding only genesis
    fn load_state(&self, storage: &Storage) -> Result<NodeState, String> {
        match storage.load_snapshot(self.params.clone()) {
            Ok(Some(state)) => Ok(state),
            Ok(None) => {
                log::info!("No stored chain, starting from genesis");
                Ok(NodeState::new(self.params.clone()))
            }
            Err(e) if e.is_fatal() => Err(format!("Refusing to start on a corrupt chain: {}", e)),
            Err(e) => Err(format!("Failed to load chain: {}", e)),
        }
    }

    /// Serve peers until Ctrl-C, mining if asked
    async fn run_node(&self, mine: bool, port: u16, peers: Vec<SocketAddr>) -> Result<(), String> {
        let config = NodeConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            peers,
            data_dir: self.data_dir.clone(),
            mine,
            params: self.params.clone(),
        };

        let identity = Arc::new(self.load_identity()?);
        let storage = self.open_storage()?;
        let state = self.load_state(&storage)?.into_shared();
        let transport = Arc::new(TcpTransport::new(config.params.peer_timeout));
        let node = Arc::new(Node::new(&config, state, Arc::clone(&identity), transport, Some(storage)));

        println!("Node {} starting", identity.miner_key());
        println!("  Listening: {}", config.listen_addr);
        println!("  Peers: {}", node.get_peers().len());
        println!("  Mining: {}", config.mine);

        let server = tokio::spawn(Arc::clone(&node).listen());

        let miner = if config.mine {
            let node = Arc::clone(&node);
            Some(tokio::spawn(async move {
                let engine = node.mining_engine();
                node.mine(&engine).await
            }))
        } else {
            None
        };

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.map_err(|e| format!("Failed to wait for Ctrl-C: {}", e))?;
                log::info!("Shutting down");
            }
            result = server => {
                match result {
                    Ok(Err(e)) => log::error!("Listener stopped: {}", e),
                    Err(e) => log::error!("Listener task failed: {}", e),
                    Ok(Ok(())) => {}
                }
            }
        }

        if let Some(miner) = miner {
            miner.abort();
        }
        node.save_state().await;
        println!("✓ State saved");
        Ok(())
    }

    /// Get chain info
    fn info(&self) -> Result<(), String> {
        let storage = self.open_storage()?;
        let state = self.load_state(&storage)?;
        let chain = &state.chain;
        let miners = chain.miner_count(chain.height());
        let difficulty = DifficultyEngine::new(&self.params).difficulty_for_next_block(chain);

        println!("Chain Info:");
        println!("  Height: {}", chain.height());
        println!("  Tip: {}", chain.tip_hash());
        println!("  Pending transactions: {}", state.pool.len());
        println!("  Active miners: {}", miners);
        println!("  Next difficulty: {}", difficulty);
        println!("  Reward multiplier: {:.6}", RewardSchedule::new(&self.params).multiplier(miners as u64));
        println!("  Verifier quorum: {}", quorum_size(miners, self.params.quorum_divisor));

        Ok(())
    }

    fn identity(&self) -> Result<(), String> {
        let identity = self.load_identity()?;
        println!("Miner key: {}", identity.miner_key());
        Ok(())
    }

    /// Build a transfer from this node's key and submit it to `peer`, which relays it
    async fn send(&self, peer: SocketAddr, recipient: &str, amount: u64) -> Result<(), String> {
        let recipient = hex::decode(recipient).map_err(|e| format!("Invalid recipient key: {}", e))?;
        let identity = self.load_identity()?;
        let tx = Transaction::new(identity.miner_key(), MinerKey::new(recipient), amount, now_nanos());

        let transport = TcpTransport::new(self.params.peer_timeout);
        transport
            .send_transaction(peer, &tx)
            .await
            .map_err(|e| format!("Failed to submit to {}: {}", peer, e))?;

        println!("Transaction submitted:");
        println!("  Hash: {}", tx.hash());
        println!("  Amount: {}", amount);
        println!("  Node: {}", peer);
        Ok(())
    }
}
