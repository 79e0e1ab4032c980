// Peer-attested block timestamps

use crate::chain::{NodeState, SharedState};
use crate::config::ConsensusParams;
use crate::core::{Block, MinerKey, Signature, now_nanos};
use crate::network::{PeerError, PeerTransport};
use crate::wallet::{Identity, verify_signature};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// A verifier's signature over a block's time-verification payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    pub signature: Signature,
    pub public_key: MinerKey,
}

/// A verifier's answer to a time-verification request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeVerdict {
    Attested(Attestation),
    /// The timestamp is not plausible to the verifier
    Declined,
}

/// Attestations gathered by one invocation of the protocol
#[derive(Debug, Clone, Default)]
pub struct AttestationRound {
    pub required: usize,
    pub attestations: Vec<Attestation>,
}

impl AttestationRound {
    pub fn obtained(&self) -> usize {
        self.attestations.len()
    }

    pub fn has_quorum(&self) -> bool {
        self.attestations.len() >= self.required
    }

    /// Split into the parallel key / signature lists stored in a block
    pub fn into_verifier_sets(self) -> (Vec<MinerKey>, Vec<Signature>) {
        self.attestations
            .into_iter()
            .map(|a| (a.public_key, a.signature))
            .unzip()
    }
}

/// Collects timestamp attestations from peers that have mined before.
///
/// Peers are polled concurrently, never more at once than the attestations
/// still missing (capped by the configured fan-out). Collection stops and
/// aborts outstanding requests as soon as quorum is reached. Every peer is
/// tried at most once per invocation.
pub struct TimeVerificationProtocol<T: PeerTransport> {
    transport: Arc<T>,
    state: SharedState,
    peers: Vec<SocketAddr>,
    fanout: usize,
    peer_timeout: Duration,
}

impl<T: PeerTransport> TimeVerificationProtocol<T> {
    pub fn new(transport: Arc<T>, state: SharedState, peers: Vec<SocketAddr>, params: &ConsensusParams) -> Self {
        Self {
            transport,
            state,
            peers,
            fanout: params.attestation_fanout.max(1),
            peer_timeout: params.peer_timeout,
        }
    }

    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub async fn collect_attestations(&self, block: &Block) -> AttestationRound {
        // Eligibility and quorum are fixed by the chain this block extends
        let (required, eligible) = {
            let state = self.state.read().await;
            (state.validator().required_quorum(&state.chain), state.chain.miners())
        };

        let mut round = AttestationRound {
            required,
            attestations: Vec::new(),
        };
        if required == 0 {
            return round;
        }

        let block = Arc::new(block.clone());
        let payload: Arc<[u8]> = block.time_verification_payload().into();
        let eligible = Arc::new(eligible);
        let mut seen = HashSet::new();
        let mut remaining = self.peers.iter().copied();
        let mut in_flight = JoinSet::new();

        loop {
            let width = (required - round.obtained()).min(self.fanout);
            while in_flight.len() < width {
                let Some(peer) = remaining.next() else { break };
                let request = PeerRequest {
                    transport: Arc::clone(&self.transport),
                    block: Arc::clone(&block),
                    payload: Arc::clone(&payload),
                    eligible: Arc::clone(&eligible),
                    timeout: self.peer_timeout,
                };
                in_flight.spawn(async move { (peer, request.attest(peer).await) });
            }

            let Some(joined) = in_flight.join_next().await else { break };
            match joined {
                Ok((peer, Ok(attestation))) => {
                    if !seen.insert(attestation.public_key.clone()) {
                        log::debug!("Ignoring second attestation from {}", peer);
                        continue;
                    }
                    log::debug!("Attestation from {} ({})", peer, attestation.public_key.short());
                    round.attestations.push(attestation);
                    if round.has_quorum() {
                        in_flight.abort_all();
                        break;
                    }
                }
                Ok((peer, Err(e))) => log::warn!("No attestation from {}: {}", peer, e),
                Err(e) => log::warn!("Attestation request failed: {}", e),
            }
        }

        log::info!(
            "Collected {}/{} time attestations for block at {}",
            round.obtained(),
            required,
            block.timestamp
        );
        round
    }
}

/// Everything one per-peer request task owns
struct PeerRequest<T> {
    transport: Arc<T>,
    block: Arc<Block>,
    payload: Arc<[u8]>,
    eligible: Arc<HashSet<MinerKey>>,
    timeout: Duration,
}

impl<T: PeerTransport> PeerRequest<T> {
    async fn attest(&self, peer: SocketAddr) -> Result<Attestation, PeerError> {
        let key = tokio::time::timeout(self.timeout, self.transport.identify(peer))
            .await
            .map_err(|_| PeerError::Timeout(peer))??;

        // New miners are not eligible verifiers
        if !self.eligible.contains(&key) {
            return Err(PeerError::Ineligible(peer));
        }

        let verdict = tokio::time::timeout(self.timeout, self.transport.verify_time(peer, &self.block))
            .await
            .map_err(|_| PeerError::Timeout(peer))??;

        match verdict {
            TimeVerdict::Declined => Err(PeerError::Declined(peer)),
            TimeVerdict::Attested(attestation) => {
                if attestation.public_key != key
                    || !verify_signature(&key, &self.payload, &attestation.signature)
                {
                    return Err(PeerError::BadSignature(peer));
                }
                Ok(attestation)
            }
        }
    }
}

/// Verifier side: whether `block`'s timestamp is plausible given the local
/// chain and clock
pub fn review_timestamp(state: &NodeState, block: &Block, now: u64) -> bool {
    state
        .validator()
        .validate_timestamp(&state.chain, block.timestamp, now)
        .is_ok()
}

/// Answer a time-verification request with this node's identity
pub fn attest(identity: &Identity, state: &NodeState, block: &Block) -> TimeVerdict {
    if !review_timestamp(state, block, now_nanos()) {
        log::warn!("Declining to attest block with timestamp {}", block.timestamp);
        return TimeVerdict::Declined;
    }
    TimeVerdict::Attested(Attestation {
        signature: identity.sign(&block.time_verification_payload()),
        public_key: identity.miner_key(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainStore;
    use crate::core::Transaction;
    use crate::network::mock::{Behaviour, MockTransport};

    fn params() -> ConsensusParams {
        ConsensusParams {
            initial_difficulty: 1,
            minimum_difficulty: 1,
            maximum_difficulty: 1,
            peer_timeout: Duration::from_millis(200),
            ..ConsensusParams::default()
        }
    }

    fn tx(n: u64) -> Transaction {
        Transaction::new(MinerKey::new(vec![2; 33]), MinerKey::new(vec![3; 33]), n, n)
    }

    /// State whose chain was mined by `miners`, one block each
    fn state_mined_by(miners: &[&Identity]) -> NodeState {
        let mut chain = ChainStore::new();
        for (i, miner) in miners.iter().enumerate() {
            let block = Block::candidate(miner.miner_key(), vec![tx(1_000 + i as u64)], 1, 1, chain.tip_hash());
            chain.push(block);
        }
        NodeState::from_parts(chain, Default::default(), params())
    }

    fn candidate(state: &NodeState) -> Block {
        Block::candidate(MinerKey::new(vec![4; 33]), vec![tx(1)], 1, now_nanos(), state.chain.tip_hash())
    }

    #[tokio::test]
    async fn test_no_miners_needs_no_quorum() {
        let mut transport = MockTransport::new();
        let peer = transport.add_peer(1, Identity::generate(), Behaviour::Honest);
        let state = NodeState::new(params());
        let block = candidate(&state);
        let protocol = TimeVerificationProtocol::new(Arc::new(transport), state.into_shared(), vec![peer], &params());

        let round = protocol.collect_attestations(&block).await;
        assert_eq!(round.required, 0);
        assert!(round.has_quorum());
        assert_eq!(protocol.transport().verify_requests(), 0);
    }

    #[tokio::test]
    async fn test_skips_failing_peers_and_reaches_quorum() {
        let verifiers: Vec<Identity> = (0..6).map(|_| Identity::generate()).collect();
        let refs: Vec<&Identity> = verifiers.iter().collect();
        // Six miners: quorum is two
        let state = state_mined_by(&refs);
        let block = candidate(&state);

        let mut transport = MockTransport::new();
        let peers = vec![
            transport.add_peer(1, verifiers[0].clone(), Behaviour::Unreachable),
            transport.add_peer(2, verifiers[1].clone(), Behaviour::Decline),
            transport.add_peer(3, Identity::generate(), Behaviour::Honest),
            transport.add_peer(4, verifiers[2].clone(), Behaviour::Forge),
            transport.add_peer(5, verifiers[3].clone(), Behaviour::WrongKey),
            transport.add_peer(6, verifiers[4].clone(), Behaviour::Honest),
            transport.add_peer(7, verifiers[5].clone(), Behaviour::Honest),
        ];
        let protocol = TimeVerificationProtocol::new(Arc::new(transport), state.into_shared(), peers, &params());

        let round = protocol.collect_attestations(&block).await;
        assert_eq!(round.required, 2);
        assert!(round.has_quorum());
        assert_eq!(round.obtained(), 2);

        let payload = block.time_verification_payload();
        let (keys, signatures) = round.into_verifier_sets();
        for (key, signature) in keys.iter().zip(&signatures) {
            assert!(verify_signature(key, &payload, signature));
        }
        assert!(keys.contains(&verifiers[4].miner_key()));
        assert!(keys.contains(&verifiers[5].miner_key()));
    }

    #[tokio::test]
    async fn test_stops_polling_once_quorum_reached() {
        let verifiers: Vec<Identity> = (0..5).map(|_| Identity::generate()).collect();
        let refs: Vec<&Identity> = verifiers.iter().collect();
        // Five miners: quorum is one
        let state = state_mined_by(&refs);
        let block = candidate(&state);

        let mut transport = MockTransport::new();
        let peers: Vec<SocketAddr> = verifiers
            .iter()
            .enumerate()
            .map(|(i, v)| transport.add_peer(10 + i as u16, v.clone(), Behaviour::Honest))
            .collect();
        let protocol = TimeVerificationProtocol::new(Arc::new(transport), state.into_shared(), peers, &params());

        let round = protocol.collect_attestations(&block).await;
        assert_eq!(round.obtained(), 1);
        // Width never exceeds the attestations still missing
        assert_eq!(protocol.transport().verify_requests(), 1);
    }

    #[tokio::test]
    async fn test_hanging_peer_is_bounded_by_timeout() {
        let verifiers: Vec<Identity> = (0..2).map(|_| Identity::generate()).collect();
        let refs: Vec<&Identity> = verifiers.iter().collect();
        let state = state_mined_by(&refs);
        let block = candidate(&state);

        let mut transport = MockTransport::new();
        let peers = vec![
            transport.add_peer(1, verifiers[0].clone(), Behaviour::Hang),
            transport.add_peer(2, verifiers[1].clone(), Behaviour::Honest),
        ];
        let protocol = TimeVerificationProtocol::new(Arc::new(transport), state.into_shared(), peers, &params());

        let started = std::time::Instant::now();
        let round = protocol.collect_attestations(&block).await;
        assert_eq!(round.obtained(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_shortfall_returns_partial_round() {
        let verifiers: Vec<Identity> = (0..6).map(|_| Identity::generate()).collect();
        let refs: Vec<&Identity> = verifiers.iter().collect();
        let state = state_mined_by(&refs);
        let block = candidate(&state);

        let mut transport = MockTransport::new();
        let peers = vec![
            transport.add_peer(1, verifiers[0].clone(), Behaviour::Honest),
            transport.add_peer(2, verifiers[1].clone(), Behaviour::Decline),
        ];
        let protocol = TimeVerificationProtocol::new(Arc::new(transport), state.into_shared(), peers, &params());

        let round = protocol.collect_attestations(&block).await;
        assert_eq!(round.required, 2);
        assert_eq!(round.obtained(), 1);
        assert!(!round.has_quorum());
    }

    #[test]
    fn test_attest_signs_plausible_timestamp() {
        let identity = Identity::generate();
        let state = NodeState::new(params());
        let block = candidate(&state);

        match attest(&identity, &state, &block) {
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
    }

    #[test]
    fn test_attest_declines_future_or_stale_timestamp() {
        let identity = Identity::generate();
        let miner = Identity::generate();
        let mut state = state_mined_by(&[&miner]);

        let mut block = candidate(&state);
        block.timestamp = now_nanos() + 3 * 60 * 60 * 1_000_000_000;
        assert_eq!(attest(&identity, &state, &block), TimeVerdict::Declined);

        // Older than the tip
        let tip = Block::candidate(miner.miner_key(), vec![tx(2)], 1, 500, state.chain.tip_hash());
        state.chain.push(tip);
        let mut block = candidate(&state);
        block.timestamp = 499;
        assert!(!review_timestamp(&state, &block, now_nanos()));
        assert_eq!(attest(&identity, &state, &block), TimeVerdict::Declined);
    }
}
