//! Background transaction synchronization: forwards newly admitted
//! transactions, advertises and serves hash status, and fetches the
//! bodies a block proposal is missing.

use crate::config::TxPoolConfig;
use crate::domain::entities::PoolTransaction;
use crate::domain::store::PoolStore;
use crate::ports::outbound::{FrontError, FrontService, Ledger};
use crate::sync::membership::Membership;
use crate::sync::messages::{TxsSyncMsg, TxsSyncPacketType};
use crate::sync::{ReplyFn, SyncError, SyncNotifier, VerifyCallback};
use parking_lot::Mutex;
use rayon::prelude::*;
use shared_types::{abridged, Hash, NodeId, Transaction, TxBatch, TxStatus};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Idle wait between worker iterations when nothing is pending.
const WORKER_IDLE_WAIT: Duration = Duration::from_millis(10);
/// Pause between the full-body broadcast and the status fan-out, giving
/// peers time to decode the bodies before their status arrives.
const STATUS_THROTTLE: Duration = Duration::from_millis(100);

/// The proposal a fetched batch is being imported for.
#[derive(Debug, Clone, Copy)]
pub struct ProposalContext {
    pub block_number: u64,
    pub block_hash: Hash,
}

/// Long-lived worker synchronizing pool contents with consensus peers.
pub struct SyncEngine {
    config: Arc<TxPoolConfig>,
    store: Arc<PoolStore>,
    front: Arc<dyn FrontService>,
    ledger: Arc<dyn Ledger>,
    membership: Arc<Membership>,
    notifier: Arc<SyncNotifier>,
    download_buffer: Mutex<Vec<(NodeId, Vec<u8>)>>,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    verify_pool: rayon::ThreadPool,
}

impl SyncEngine {
    pub fn new(
        config: Arc<TxPoolConfig>,
        store: Arc<PoolStore>,
        front: Arc<dyn FrontService>,
        ledger: Arc<dyn Ledger>,
        membership: Arc<Membership>,
        notifier: Arc<SyncNotifier>,
    ) -> Result<Self, SyncError> {
        let verify_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.verify_worker_num.max(1))
            .build()
            .map_err(|e| SyncError::Engine(e.to_string()))?;
        Ok(Self {
            config,
            store,
            front,
            ledger,
            membership,
            notifier,
            download_buffer: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
            verify_pool,
        })
    }

    /// Spawn the worker loop. The task holds only a weak handle and exits
    /// when the engine is dropped or stopped.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                let Some(engine) = weak.upgrade() else {
                    return;
                };
                if !engine.running.load(Ordering::Acquire) {
                    return;
                }
                engine.execute_worker().await;
            }
        });
        *self.worker.lock() = Some(handle);
        info!("transaction sync started");
    }

    /// Stop the worker and wait for it to exit.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            debug!("transaction sync already stopped");
            return;
        }
        self.notifier.wake();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("transaction sync stopped");
    }

    fn download_buffer_empty(&self) -> bool {
        self.download_buffer.lock().is_empty()
    }

    async fn execute_worker(self: &Arc<Self>) {
        if !self.download_buffer_empty() {
            self.maintain_downloading_transactions().await;
        }
        if self.membership.in_group()
            && self.notifier.has_new_txs()
            && self.download_buffer_empty()
        {
            self.maintain_transactions().await;
        }
        if !self.notifier.has_new_txs() && self.download_buffer_empty() {
            tokio::select! {
                _ = self.notifier.notified() => {}
                _ = tokio::time::sleep(WORKER_IDLE_WAIT) => {}
            }
        }
    }

    /// Forward the freshly admitted transactions: full bodies of
    /// client-submitted ones to every consensus peer, then hash status to
    /// a bounded slice of peers that do not know each hash yet.
    pub async fn maintain_transactions(self: &Arc<Self>) {
        let txs = self.store.fetch_new_txs(self.config.max_broadcast_txs);
        if txs.is_empty() {
            self.notifier.clear_new_txs();
            return;
        }
        self.broadcast_txs_from_rpc(&txs).await;
        tokio::time::sleep(STATUS_THROTTLE).await;
        self.forward_txs_status(&txs).await;
    }

    /// Push the full bodies of client-submitted transactions to every
    /// consensus peer except ourselves. Gossip-relayed transactions (no
    /// submit callback) are left to the status path.
    async fn broadcast_txs_from_rpc(&self, txs: &[Arc<PoolTransaction>]) {
        let bodies: Vec<Transaction> = txs
            .iter()
            .filter(|entry| entry.has_callback())
            .map(|entry| entry.transaction().as_ref().clone())
            .collect();
        if bodies.is_empty() {
            return;
        }
        let count = bodies.len();
        let packet = match TxsSyncMsg::txs_packet(&TxBatch::new(bodies)) {
            Ok(packet) => packet.encode(),
            Err(error) => {
                warn!(%error, "failed to encode transaction broadcast");
                return;
            }
        };
        let self_id = self.membership.node_id();
        for peer in self.membership.consensus_node_list() {
            if peer == self_id {
                continue;
            }
            if let Err(error) = self.front.send_message(&peer, packet.clone()).await {
                warn!(%error, peer = %peer.short_hex(), "transaction broadcast failed");
                continue;
            }
            debug!(
                peer = %peer.short_hex(),
                txs = count,
                bytes = packet.len(),
                "broadcast client transactions"
            );
        }
    }

    /// Advertise each transaction's hash to a bounded number of consensus
    /// peers that do not already know it, grouped into one status packet
    /// per peer.
    async fn forward_txs_status(&self, txs: &[Arc<PoolTransaction>]) {
        let consensus = self.membership.consensus_node_list();
        let connected = self.membership.connected_nodes();
        let expected =
            ((consensus.len() as u64 * self.config.forward_percent + 99) / 100) as usize;
        let mut peer_to_hashes: BTreeMap<NodeId, Vec<Hash>> = BTreeMap::new();
        for entry in txs {
            for peer in self.select_peers(entry, &connected, &consensus, expected) {
                peer_to_hashes.entry(peer).or_default().push(entry.hash());
            }
        }
        for (peer, hashes) in peer_to_hashes {
            let packet = match TxsSyncMsg::status_packet(&hashes) {
                Ok(packet) => packet.encode(),
                Err(error) => {
                    warn!(%error, "failed to encode status packet");
                    return;
                }
            };
            if let Err(error) = self.front.send_message(&peer, packet).await {
                warn!(%error, peer = %peer.short_hex(), "status forward failed");
                continue;
            }
            debug!(
                peer = %peer.short_hex(),
                txs = hashes.len(),
                "forwarded transaction status"
            );
        }
    }

    /// Walk the consensus list in order and pick up to `expected_size`
    /// peers that are connected, are not ourselves, and do not yet know
    /// the transaction; each pick is recorded in `known_by`.
    fn select_peers(
        &self,
        entry: &PoolTransaction,
        connected: &HashSet<NodeId>,
        consensus: &[NodeId],
        expected_size: usize,
    ) -> Vec<NodeId> {
        if expected_size == 0 {
            return Vec::new();
        }
        let self_id = self.membership.node_id();
        let mut selected = Vec::new();
        for peer in consensus {
            if !connected.contains(peer) {
                continue;
            }
            if *peer == self_id {
                continue;
            }
            if entry.is_known_by(peer) {
                continue;
            }
            selected.push(*peer);
            entry.append_known_node(*peer);
            if selected.len() >= expected_size {
                break;
            }
        }
        selected
    }

    /// Drain the download buffer and import every carried batch.
    pub async fn maintain_downloading_transactions(self: &Arc<Self>) {
        let buffer = std::mem::take(&mut *self.download_buffer.lock());
        if buffer.is_empty() {
            return;
        }
        if !self.membership.in_group() {
            debug!(
                pool_size = self.store.size(),
                buffered = buffer.len(),
                "dropping downloaded transactions: node not in the group"
            );
            return;
        }
        for (from, payload) in buffer {
            match TxBatch::decode(&payload) {
                Ok(batch) => {
                    self.import_downloaded_txs(from, batch.transactions, None);
                }
                Err(error) => {
                    warn!(%error, peer = %from.short_hex(), "discarding undecodable batch");
                }
            }
        }
    }

    /// Verify a downloaded batch in parallel and admit it.
    ///
    /// Under a proposal (`enforce` mode) any signature failure, or any
    /// admission verdict other than success or already-present, fails the
    /// whole import so block verification can report a negative verdict.
    /// Outside a proposal, bad transactions are skipped individually.
    pub fn import_downloaded_txs(
        self: &Arc<Self>,
        from: NodeId,
        txs: Vec<Transaction>,
        proposal: Option<ProposalContext>,
    ) -> bool {
        if txs.is_empty() {
            return true;
        }
        let total = txs.len();
        let enforce = proposal.is_some();
        let entries: Vec<Arc<PoolTransaction>> = txs
            .into_iter()
            .map(|tx| Arc::new(PoolTransaction::new(tx, None)))
            .collect();

        let verify_ok = AtomicBool::new(true);
        self.verify_pool.install(|| {
            entries.par_iter().for_each(|entry| {
                entry.append_known_node(from);
                if let Some(context) = proposal {
                    entry.set_batch(context.block_number, context.block_hash);
                }
                if self.store.exist(&entry.hash()) {
                    return;
                }
                if let Err(error) = entry.transaction().verify() {
                    entry.set_invalid(true);
                    verify_ok.store(false, Ordering::Release);
                    warn!(
                        %error,
                        tx = %abridged(&entry.hash()),
                        "downloaded transaction failed signature verification"
                    );
                }
            });
        });
        if enforce && !verify_ok.load(Ordering::Acquire) {
            return false;
        }

        let mut imported = 0usize;
        for entry in entries {
            if entry.is_invalid() {
                continue;
            }
            let hash = entry.hash();
            match self.store.submit_entry(entry, enforce) {
                TxStatus::Ok => imported += 1,
                TxStatus::AlreadyInPool if enforce => {}
                status if enforce => {
                    debug!(
                        tx = %abridged(&hash),
                        %status,
                        "proposal transaction rejected by the pool"
                    );
                    return false;
                }
                status => {
                    trace!(tx = %abridged(&hash), %status, "downloaded transaction not imported");
                }
            }
        }
        debug!(imported, total, "imported downloaded transactions");
        true
    }

    /// Fetch missing bodies from the named peer, or from the local ledger
    /// when no peer is given, and report the outcome to `callback`.
    pub async fn request_missed_txs(
        self: &Arc<Self>,
        peer: Option<NodeId>,
        missed: Vec<Hash>,
        proposal: Option<ProposalContext>,
        callback: Option<VerifyCallback>,
    ) {
        match peer {
            Some(peer) => {
                info!(
                    txs = missed.len(),
                    peer = %peer.short_hex(),
                    "fetching missing transactions from peer"
                );
                self.request_missed_txs_from_peer(peer, missed, proposal, callback)
                    .await;
            }
            None => {
                let result = self.ledger.batch_txs_by_hash(&missed).await;
                self.on_missed_txs_from_ledger(missed, result, proposal, callback);
            }
        }
    }

    /// Import what the ledger returned and succeed only if every missing
    /// hash was covered.
    fn on_missed_txs_from_ledger(
        self: &Arc<Self>,
        missed: Vec<Hash>,
        result: Result<Vec<Option<Transaction>>, crate::ports::outbound::LedgerError>,
        proposal: Option<ProposalContext>,
        callback: Option<VerifyCallback>,
    ) {
        let bodies = match result {
            Ok(bodies) => bodies,
            Err(error) => {
                warn!(%error, "fetching missing transactions from the ledger failed");
                respond(callback, Err(SyncError::TransactionsMissing));
                return;
            }
        };
        let fetched: Vec<Transaction> = bodies.into_iter().flatten().collect();
        let mut outstanding: HashSet<Hash> = missed.into_iter().collect();
        for tx in &fetched {
            outstanding.remove(&tx.hash());
        }
        if !self.import_downloaded_txs(self.membership.node_id(), fetched, proposal) {
            warn!("ledger-fetched transactions failed verification");
            respond(callback, Err(SyncError::TransactionsMissing));
            return;
        }
        if outstanding.is_empty() {
            info!("all missing transactions found on the ledger");
            respond(callback, Ok(()));
        } else {
            debug!(missing = outstanding.len(), "ledger is missing transactions");
            respond(callback, Err(SyncError::TransactionsMissing));
        }
    }

    /// Ask `peer` for the bodies of `missed` and verify whatever comes
    /// back.
    pub async fn request_missed_txs_from_peer(
        self: &Arc<Self>,
        peer: NodeId,
        missed: Vec<Hash>,
        proposal: Option<ProposalContext>,
        callback: Option<VerifyCallback>,
    ) {
        if missed.is_empty() {
            respond(callback, Ok(()));
            return;
        }
        let request = match TxsSyncMsg::request_packet(&missed) {
            Ok(request) => request.encode(),
            Err(error) => {
                respond(callback, Err(error.into()));
                return;
            }
        };
        let response = self
            .front
            .request(&peer, request, self.config.network_timeout)
            .await;
        self.verify_fetched_txs(response, peer, &missed, proposal, callback);
    }

    /// Judge a peer's response to a body request: transport errors, wrong
    /// packet kinds, count mismatches, signature failures, and per-index
    /// hash mismatches all produce a negative verdict. On a count
    /// mismatch the verdict is reported first and the partial response is
    /// still imported best-effort.
    pub fn verify_fetched_txs(
        self: &Arc<Self>,
        response: Result<Vec<u8>, FrontError>,
        peer: NodeId,
        missed: &[Hash],
        proposal: Option<ProposalContext>,
        callback: Option<VerifyCallback>,
    ) {
        let data = match response {
            Ok(data) => data,
            Err(error) => {
                info!(
                    %error,
                    peer = %peer.short_hex(),
                    txs = missed.len(),
                    "fetching missing transactions failed"
                );
                let error = match error {
                    FrontError::Timeout => SyncError::Timeout,
                    other => SyncError::Network(other.to_string()),
                };
                respond(callback, Err(error));
                return;
            }
        };
        let message = match TxsSyncMsg::decode(&data) {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, peer = %peer.short_hex(), "undecodable fetch response");
                respond(callback, Err(SyncError::FetchTransactionsFailed));
                return;
            }
        };
        if message.packet_type() != TxsSyncPacketType::TxsResponse {
            warn!(
                peer = %peer.short_hex(),
                received = ?message.packet_type(),
                "expected a response packet"
            );
            respond(callback, Err(SyncError::FetchTransactionsFailed));
            return;
        }
        let batch = match message.batch() {
            Ok(batch) => batch,
            Err(error) => {
                warn!(%error, peer = %peer.short_hex(), "undecodable response batch");
                respond(callback, Err(SyncError::FetchTransactionsFailed));
                return;
            }
        };
        if batch.len() != missed.len() {
            info!(
                expected = missed.len(),
                fetched = batch.len(),
                peer = %peer.short_hex(),
                "fetched transaction count mismatched"
            );
            respond(callback, Err(SyncError::TransactionsMissing));
            // keep whatever did arrive
            self.import_downloaded_txs(peer, batch.transactions, None);
            return;
        }
        let fetched_hashes = batch.hashes();
        if !self.import_downloaded_txs(peer, batch.transactions, proposal) {
            respond(callback, Err(SyncError::TxsSignatureVerifyFailed));
            return;
        }
        for (requested, fetched) in missed.iter().zip(fetched_hashes.iter()) {
            if requested != fetched {
                warn!(
                    peer = %peer.short_hex(),
                    requested = %abridged(requested),
                    fetched = %abridged(fetched),
                    "fetched transaction inconsistent with request"
                );
                respond(callback, Err(SyncError::InconsistentTransactions));
                return;
            }
        }
        respond(callback, Ok(()));
    }

    /// Serve a peer's body request: respond with the found bodies in
    /// found order, silently omitting misses (the requester detects the
    /// count mismatch).
    fn on_receive_txs_request(&self, message: &TxsSyncMsg, peer: NodeId) -> Result<Vec<u8>, SyncError> {
        let hashes = message.hashes()?;
        let (found, missed) = self.store.fetch_txs(&hashes);
        if !missed.is_empty() {
            debug!(
                missed = missed.len(),
                peer = %peer.short_hex(),
                "body request hit misses"
            );
        }
        let bodies: Vec<Transaction> = found.iter().map(|tx| tx.as_ref().clone()).collect();
        let count = bodies.len();
        let response = TxsSyncMsg::response_packet(&TxBatch::new(bodies))?;
        info!(peer = %peer.short_hex(), txs = count, "served transaction bodies");
        Ok(response.encode())
    }

    /// Handle a peer's status advert: finish pending downloads first,
    /// then request every hash we do not hold.
    async fn on_peer_txs_status(self: &Arc<Self>, from: NodeId, message: TxsSyncMsg) {
        while !self.download_buffer_empty() {
            self.maintain_downloading_transactions().await;
        }
        let hashes = match message.hashes() {
            Ok(hashes) => hashes,
            Err(error) => {
                warn!(%error, peer = %from.short_hex(), "undecodable status packet");
                return;
            }
        };
        if hashes.is_empty() {
            return;
        }
        let unknown = self.store.filter_unknown_txs(&hashes, &from);
        if unknown.is_empty() {
            return;
        }
        debug!(
            requested = unknown.len(),
            advertised = hashes.len(),
            peer = %from.short_hex(),
            "requesting advertised transactions"
        );
        self.request_missed_txs(Some(from), unknown, None, None).await;
    }

    /// Transport entry point: dispatch one framed sync message.
    pub fn on_recv_sync_message(
        self: &Arc<Self>,
        from: NodeId,
        data: Vec<u8>,
        reply: Option<ReplyFn>,
    ) {
        let message = match TxsSyncMsg::decode(&data) {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, peer = %from.short_hex(), "undecodable sync message");
                return;
            }
        };
        match message.packet_type() {
            TxsSyncPacketType::Txs => {
                self.download_buffer.lock().push((from, message.into_payload()));
                self.notifier.wake();
            }
            TxsSyncPacketType::TxsRequest => {
                let weak: Weak<SyncEngine> = Arc::downgrade(self);
                tokio::spawn(async move {
                    let Some(engine) = weak.upgrade() else {
                        return;
                    };
                    match engine.on_receive_txs_request(&message, from) {
                        Ok(response) => {
                            if let Some(reply) = reply {
                                reply(response);
                            }
                        }
                        Err(error) => {
                            warn!(%error, peer = %from.short_hex(), "serving body request failed");
                        }
                    }
                });
            }
            TxsSyncPacketType::TxsStatus => {
                let weak: Weak<SyncEngine> = Arc::downgrade(self);
                tokio::spawn(async move {
                    let Some(engine) = weak.upgrade() else {
                        return;
                    };
                    engine.on_peer_txs_status(from, message).await;
                });
            }
            TxsSyncPacketType::TxsResponse => {
                // solicited responses arrive through the transport's
                // request correlation, never through this path
                warn!(peer = %from.short_hex(), "ignoring unsolicited response packet");
            }
        }
    }
}

fn respond(callback: Option<VerifyCallback>, result: Result<(), SyncError>) {
    if let Some(callback) = callback {
        let _ = callback.send(result);
    }
}
