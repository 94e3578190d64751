//! The verifier RPC surface.
//!
//! All handlers delegate to a transport-free [`VerifierService`] so the
//! contract is testable without sockets; the axum router is a thin
//! binding over it. Streamed advertisements arrive as batched posts
//! (each message already carries a repeated list).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{routing::post, Json, Router};
use ethereum_types::Address;
use tracing::{debug, info, trace, warn};

use crate::block::Block;
use crate::learner::Learner;
use crate::queue::TxQueue;
use crate::txn::TransactionData;
use crate::wire::{
    BlockAdvertisement, ErrorCode, HandshakeMessage, MerkleNodeAdvertisement,
    NeighborAdvertisement, TransactionReply, TransactionRequest, PROTOCOL_VERSION,
};

/// The inbound face of the verifier: decodes, validates, and forwards to
/// the queue (transactions) or the learner (advertisements).
#[derive(Debug)]
pub struct VerifierService {
    beneficiary: Address,
    queue: Arc<TxQueue>,
    learner: Arc<Learner>,
}

impl VerifierService {
    pub fn new(beneficiary: Address, queue: Arc<TxQueue>, learner: Arc<Learner>) -> Self {
        Self {
            beneficiary,
            queue,
            learner,
        }
    }

    /// Version and beneficiary exchange with a peer verifier.
    pub fn handshake(&self, peer: &HandshakeMessage) -> HandshakeMessage {
        debug!(peer_version = %peer.version, "handshake");
        HandshakeMessage {
            protocol_version: PROTOCOL_VERSION,
            version: env!("CARGO_PKG_VERSION").to_string(),
            beneficiary: self.beneficiary,
        }
    }

    /// Decodes and enqueues a submitted transaction, then waits for its
    /// height to execute. Decode and witness failures reply `INVALID`
    /// synchronously and leave every shared structure untouched.
    pub async fn submit_transaction(&self, request: TransactionRequest) -> TransactionReply {
        let (data, rx) = match TransactionData::from_wire(
            request.transaction,
            &request.account_witnesses,
        ) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "rejecting transaction");
                return TransactionReply {
                    code: ErrorCode::Invalid,
                };
            }
        };

        trace!(tx = %data.tx_hash, witnesses = data.proofs.len(), "queued transaction");
        self.queue.push_back(data);

        // The sender side is consumed when the transaction's height
        // executes; a dropped sender (shutdown) reads as a rejection.
        let code = rx.await.unwrap_or(ErrorCode::Invalid);
        TransactionReply { code }
    }

    /// Ingests a batch of peer-advertised trie nodes.
    pub fn advertise_node(&self, msg: MerkleNodeAdvertisement) {
        for bytes in &msg.node_list {
            match self.learner.learn_node(bytes) {
                Ok(hash) => trace!(%hash, "learned node"),
                Err(e) => debug!(error = %e, "ignoring malformed node advertisement"),
            }
        }
    }

    /// Ingests a peer-advertised block.
    pub fn advertise_block(&self, msg: BlockAdvertisement) {
        match Block::decode(&msg.block) {
            Ok(block) => self.learner.learn_block(block),
            Err(e) => debug!(error = %e, "ignoring malformed block advertisement"),
        }
    }

    /// Registers a peer as an advertisement target.
    pub fn advertise_neighbor(&self, msg: NeighborAdvertisement) {
        self.learner.add_neighbor(msg.host, msg.port);
    }
}

/// The HTTP binding of the service.
pub fn router(service: Arc<VerifierService>) -> Router {
    Router::new()
        .route(
            "/handshake",
            post({
                let service = service.clone();
                move |Json(peer): Json<HandshakeMessage>| {
                    let service = service.clone();
                    async move { Json(service.handshake(&peer)) }
                }
            }),
        )
        .route(
            "/transaction",
            post({
                let service = service.clone();
                move |Json(request): Json<TransactionRequest>| {
                    let service = service.clone();
                    async move { Json(service.submit_transaction(request).await) }
                }
            }),
        )
        .route(
            "/advertise/node",
            post({
                let service = service.clone();
                move |Json(msg): Json<MerkleNodeAdvertisement>| {
                    let service = service.clone();
                    async move { service.advertise_node(msg) }
                }
            }),
        )
        .route(
            "/advertise/block",
            post({
                let service = service.clone();
                move |Json(msg): Json<BlockAdvertisement>| {
                    let service = service.clone();
                    async move { service.advertise_block(msg) }
                }
            }),
        )
        .route(
            "/advertise/neighbor",
            post(move |Json(msg): Json<NeighborAdvertisement>| {
                let service = service.clone();
                async move { service.advertise_neighbor(msg) }
            }),
        )
}

/// Binds and serves the RPC surface until the process exits.
pub async fn serve(service: Arc<VerifierService>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "verifier RPC listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    Ok(axum::serve(listener, router(service)).await?)
}
