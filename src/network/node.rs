// Network node - serves peers, broadcasts, and drives the miner

use crate::chain::{SharedState, SubmitOutcome};
use crate::config::{ConsensusParams, NodeConfig};
use crate::consensus::time_verification::attest;
use crate::consensus::{MiningEngine, MiningError, TimeVerdict, TimeVerificationProtocol};
use crate::core::{Block, Transaction};
use crate::network::{Message, Peer, PeerError, PeerTransport};
use crate::storage::Storage;
use crate::wallet::Identity;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

/// Outcome of sending one message to every peer
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<SocketAddr>,
    pub failed: Vec<(SocketAddr, PeerError)>,
}

impl BroadcastReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Network node
pub struct Node<T: PeerTransport> {
    /// Node address
    pub addr: SocketAddr,
    state: SharedState,
    identity: Arc<Identity>,
    transport: Arc<T>,
    peers: Vec<SocketAddr>,
    storage: Option<Storage>,
    params: ConsensusParams,
}

impl<T: PeerTransport> Node<T> {
    pub fn new(
        config: &NodeConfig,
        state: SharedState,
        identity: Arc<Identity>,
        transport: Arc<T>,
        storage: Option<Storage>,
    ) -> Self {
        Self {
            addr: config.listen_addr,
            state,
            identity,
            transport,
            peers: config.peers.clone(),
            storage,
            params: config.params.clone(),
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Known peers
    pub fn get_peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    /// Start listening for incoming connections
    pub async fn listen(self: Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        log::info!("Node listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New connection from {}", addr);

            let node = Arc::clone(&self);
            // Handle peer in separate task
            tokio::spawn(async move {
                node.handle_peer(stream, addr).await;
            });
        }
    }

    /// Answer requests on one connection until the peer hangs up
    async fn handle_peer(&self, stream: TcpStream, addr: SocketAddr) {
        let mut peer = Peer::new(stream, addr);

        loop {
            let request = match peer.receive_message().await {
                Ok(message) => message,
                Err(PeerError::Unreachable { .. }) => break,
                Err(e) => {
                    log::warn!("Malformed request from {}: {}", addr, e);
                    let _ = peer.send_message(&Message::Reject(e.to_string())).await;
                    break;
                }
            };
            log::debug!("Received {:?} from {}", request.message_type(), addr);

            let (reply, relay) = self.handle_request(request).await;
            if let Err(e) = peer.send_message(&reply).await {
                log::debug!("Failed to reply to {}: {}", addr, e);
                break;
            }

            // Relay after the ack so the submitter is not held up by slow peers
            if let Some(tx) = relay {
                let report = self.broadcast_transaction(&tx).await;
                if !report.all_delivered() {
                    log::warn!(
                        "Relayed transaction {} to {}/{} peers",
                        tx.hash(),
                        report.delivered.len(),
                        self.peers.len()
                    );
                }
            }
        }
    }

    /// Reply to one request, plus a transaction to relay if it was new here
    async fn handle_request(&self, request: Message) -> (Message, Option<Transaction>) {
        let reply = match request {
            Message::Identify => Message::Identity(self.identity.miner_key()),
            Message::VerifyTime(block) => {
                let state = self.state.read().await;
                match attest(&self.identity, &state, &block) {
                    TimeVerdict::Attested(attestation) => Message::TimeVerified(attestation),
                    TimeVerdict::Declined => Message::TimeRejected,
                }
            }
            Message::Tx(tx) => {
                let outcome = self.state.write().await.submit_transaction(tx.clone());
                log::debug!("Transaction {} submitted: {:?}", tx.hash(), outcome);
                // Relay only what is new here, so relays stop at nodes that know it
                if outcome == SubmitOutcome::Added {
                    self.save_state().await;
                    return (Message::Ack, Some(tx));
                }
                Message::Ack
            }
            Message::Block(block) => {
                let result = self.state.write().await.accept_block(block);
                match result {
                    Ok(_) => {
                        self.save_state().await;
                        Message::Ack
                    }
                    Err(e) => {
                        log::warn!("Rejected block from peer: {}", e);
                        Message::Reject(e.to_string())
                    }
                }
            }
            other => Message::Reject(format!("unexpected {:?}", other.message_type())),
        };
        (reply, None)
    }

    /// Save the current state, if this node persists
    pub async fn save_state(&self) {
        if let Some(storage) = &self.storage {
            let state = self.state.read().await;
            if let Err(e) = storage.save_snapshot(&state) {
                log::error!("Failed to save snapshot: {}", e);
            }
        }
    }

    /// Send to every peer concurrently and wait for every result
    async fn broadcast<F, Fut>(&self, what: &str, send: F) -> BroadcastReport
    where
        F: Fn(Arc<T>, SocketAddr) -> Fut,
        Fut: Future<Output = Result<(), PeerError>> + Send + 'static,
    {
        let mut in_flight = JoinSet::new();
        for &peer in &self.peers {
            let delivery = send(Arc::clone(&self.transport), peer);
            let timeout = self.params.peer_timeout;
            in_flight.spawn(async move {
                let result = tokio::time::timeout(timeout, delivery)
                    .await
                    .unwrap_or(Err(PeerError::Timeout(peer)));
                (peer, result)
            });
        }

        let mut report = BroadcastReport::default();
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok((peer, Ok(()))) => report.delivered.push(peer),
                Ok((peer, Err(e))) => {
                    log::warn!("Failed to send {} to {}: {}", what, peer, e);
                    report.failed.push((peer, e));
                }
                Err(e) => log::error!("Broadcast task failed: {}", e),
            }
        }

        log::info!(
            "Broadcast {} to {}/{} peers",
            what,
            report.delivered.len(),
            self.peers.len()
        );
        report
    }

    /// Broadcast a block to all peers
    pub async fn broadcast_block(&self, block: &Block) -> BroadcastReport {
        let block = Arc::new(block.clone());
        self.broadcast("block", move |transport, peer| {
            let block = Arc::clone(&block);
            async move { transport.send_block(peer, &block).await }
        })
        .await
    }

    /// Broadcast a transaction to all peers
    pub async fn broadcast_transaction(&self, tx: &Transaction) -> BroadcastReport {
        let tx = Arc::new(tx.clone());
        self.broadcast("transaction", move |transport, peer| {
            let tx = Arc::clone(&tx);
            async move { transport.send_transaction(peer, &tx).await }
        })
        .await
    }

    /// Mining engine wired to this node's state, identity and peers
    pub fn mining_engine(&self) -> MiningEngine<T> {
        let protocol = TimeVerificationProtocol::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.state),
            self.peers.clone(),
            &self.params,
        );
        MiningEngine::new(
            Arc::clone(&self.state),
            Arc::clone(&self.identity),
            protocol,
            &self.params,
        )
    }

    /// Mine until a fatal error. Each mined block is accepted locally,
    /// saved, then broadcast.
    pub async fn mine(&self, engine: &MiningEngine<T>) -> Result<(), MiningError> {
        loop {
            match engine.create_block().await {
                Ok(block) => {
                    if self.accept_mined(&block).await {
                        self.save_state().await;
                        self.broadcast_block(&block).await;
                    }
                }
                Err(MiningError::PoolDry) => {
                    log::debug!("Pool dry, waiting {:?}", self.params.pool_dry_backoff);
                    tokio::time::sleep(self.params.pool_dry_backoff).await;
                }
                Err(e) if e.is_fatal() => {
                    log::error!("Stopping block production: {}", e);
                    return Err(e);
                }
                Err(e) => log::warn!("Mining attempt failed, retrying: {}", e),
            }
        }
    }

    /// Append a locally mined block. On rejection its transactions go back
    /// to the pool unless the chain already holds them.
    async fn accept_mined(&self, block: &Block) -> bool {
        let mut state = self.state.write().await;
        match state.accept_block(block.clone()) {
            Ok(_) => true,
            Err(e) => {
                let restored = state.reinstate_transactions(block);
                log::warn!(
                    "Mined block rejected ({}), {} transactions returned to the pool",
                    e,
                    restored
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::NodeState;
    use crate::core::MinerKey;
    use crate::network::TcpTransport;
    use crate::network::mock::{Behaviour, MockTransport};
    use crate::wallet::verify_signature;
    use std::time::Duration;

    fn params() -> ConsensusParams {
        ConsensusParams {
            initial_difficulty: 1,
            minimum_difficulty: 1,
            maximum_difficulty: 1,
            peer_timeout: Duration::from_secs(2),
            ..ConsensusParams::default()
        }
    }

    fn config(peers: Vec<SocketAddr>) -> NodeConfig {
        NodeConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            peers,
            data_dir: std::env::temp_dir(),
            mine: false,
            params: params(),
        }
    }

    fn tx(n: u64) -> Transaction {
        Transaction::new(MinerKey::new(vec![2; 33]), MinerKey::new(vec![3; 33]), n, n)
    }

    /// Serve a fresh node over TCP; returns its address and state
    async fn spawn_server(identity: Identity) -> (SocketAddr, SharedState) {
        let state = NodeState::new(params()).into_shared();
        let transport = Arc::new(TcpTransport::new(Duration::from_secs(2)));
        let node = Arc::new(Node::new(&config(Vec::new()), state.clone(), Arc::new(identity), transport, None));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(node.serve(listener));
        (addr, state)
    }

    #[tokio::test]
    async fn test_identify_and_verify_time_over_tcp() {
        let identity = Identity::generate();
        let (addr, state) = spawn_server(identity.clone()).await;
        let client = TcpTransport::new(Duration::from_secs(2));

        assert_eq!(client.identify(addr).await.unwrap(), identity.miner_key());

        let tip = state.read().await.chain.tip_hash();
        let block = Block::candidate(MinerKey::new(vec![4; 33]), vec![tx(1)], 1, crate::core::now_nanos(), tip);
        match client.verify_time(addr, &block).await.unwrap() {
            TimeVerdict::Attested(attestation) => {
                assert_eq!(attestation.public_key, identity.miner_key());
                assert!(verify_signature(
                    &attestation.public_key,
                    &block.time_verification_payload(),
                    &attestation.signature
                ));
            }
            TimeVerdict::Declined => panic!("plausible timestamp declined"),
        }

        let mut far_future = block.clone();
        far_future.timestamp = u64::MAX;
        assert_eq!(client.verify_time(addr, &far_future).await.unwrap(), TimeVerdict::Declined);
    }

    #[tokio::test]
    async fn test_submit_transaction_and_block_over_tcp() {
        let (addr, state) = spawn_server(Identity::generate()).await;
        let client = TcpTransport::new(Duration::from_secs(2));

        client.send_transaction(addr, &tx(1)).await.unwrap();
        assert_eq!(state.read().await.pool.len(), 1);

        let tip = state.read().await.chain.tip_hash();
        let block = Block::candidate(MinerKey::new(vec![4; 33]), vec![tx(1)], 1, 1, tip);
        client.send_block(addr, &block).await.unwrap();
        {
            let state = state.read().await;
            assert_eq!(state.chain.height(), 2);
            assert!(state.pool.is_empty());
        }

        // Same block again no longer extends the tip
        assert!(matches!(
            client.send_block(addr, &block).await,
            Err(PeerError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_new_transaction_is_relayed_once() {
        let mut transport = MockTransport::new();
        let peer = transport.add_peer(1, Identity::generate(), Behaviour::Honest);
        let down = transport.add_peer(2, Identity::generate(), Behaviour::Unreachable);
        let transport = Arc::new(transport);
        let state = NodeState::new(params()).into_shared();
        let node = Arc::new(Node::new(
            &config(vec![peer, down]),
            state,
            Arc::new(Identity::generate()),
            Arc::clone(&transport),
            None,
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(node.serve(listener));

        let client = TcpTransport::new(Duration::from_secs(2));
        client.send_transaction(addr, &tx(1)).await.unwrap();
        client.send_transaction(addr, &tx(1)).await.unwrap();

        // The relay runs on the connection after the ack; a dead peer does not stop it
        for _ in 0..50 {
            if !transport.transactions.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.transactions.lock().unwrap().as_slice(), &[(peer, tx(1))]);
    }

    #[tokio::test]
    async fn test_broadcast_reports_every_peer() {
        let mut transport = MockTransport::new();
        let good = transport.add_peer(1, Identity::generate(), Behaviour::Honest);
        let down = transport.add_peer(2, Identity::generate(), Behaviour::Unreachable);
        let transport = Arc::new(transport);
        let state = NodeState::new(params()).into_shared();
        let node = Node::new(
            &config(vec![good, down]),
            state,
            Arc::new(Identity::generate()),
            Arc::clone(&transport),
            None,
        );

        let report = node.broadcast_transaction(&tx(1)).await;
        assert_eq!(report.delivered, vec![good]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, down);
        assert!(!report.all_delivered());
        assert_eq!(transport.transactions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mined_block_is_accepted_and_broadcast() {
        let mut transport = MockTransport::new();
        let peer = transport.add_peer(1, Identity::generate(), Behaviour::Honest);
        let transport = Arc::new(transport);
        let state = NodeState::new(params()).into_shared();
        state.write().await.submit_transaction(tx(1));
        let storage = Storage::memory().unwrap();
        let node = Node::new(
            &config(vec![peer]),
            state.clone(),
            Arc::new(Identity::generate()),
            Arc::clone(&transport),
            Some(storage),
        );
        let engine = node.mining_engine();

        let block = engine.create_block().await.unwrap();
        assert!(node.accept_mined(&block).await);
        node.save_state().await;
        node.broadcast_block(&block).await;

        assert_eq!(state.read().await.chain.height(), 2);
        assert_eq!(transport.blocks.lock().unwrap().len(), 1);
        let stored = node.storage.as_ref().unwrap().blockchain.get_chain_height().unwrap();
        assert_eq!(stored, 2);
    }

    #[tokio::test]
    async fn test_rejected_mined_block_returns_transactions() {
        let state = NodeState::new(params()).into_shared();
        state.write().await.submit_transaction(tx(1));
        let node = Node::new(
            &config(Vec::new()),
            state.clone(),
            Arc::new(Identity::generate()),
            Arc::new(MockTransport::new()),
            None,
        );
        let engine = node.mining_engine();
        let block = engine.create_block().await.unwrap();

        // A competing block wins the race first
        let rival = {
            let mut guard = state.write().await;
            let rival = Block::candidate(MinerKey::new(vec![5; 33]), vec![tx(2)], 1, 1, guard.chain.tip_hash());
            guard.accept_block(rival.clone()).unwrap();
            rival
        };
        assert_ne!(rival.hash(), block.hash());

        assert!(!node.accept_mined(&block).await);
        let guard = state.read().await;
        assert_eq!(guard.pool.transactions(), &[tx(1)]);
    }
}
