//! Pool configuration.

use std::time::Duration;

/// Transaction pool configuration.
#[derive(Clone, Debug)]
pub struct TxPoolConfig {
    /// Chain identity; transactions must match exactly.
    pub chain_id: String,
    /// Group identity; transactions must match exactly.
    pub group_id: String,
    /// Maximum entries in the pool.
    pub pool_limit: usize,
    /// Ledger nonce window size and the maximum gap between a
    /// transaction's block limit and the current tip.
    pub block_limit: u64,
    /// Concurrent submit-result deliveries and deferred-GC drains.
    pub notifier_worker_num: usize,
    /// Threads dedicated to batch signature verification.
    pub verify_worker_num: usize,
    /// Timeout for hash-request round trips to peers.
    pub network_timeout: Duration,
    /// Percentage (0..=100) of the consensus set each new transaction's
    /// status is advertised to.
    pub forward_percent: u64,
    /// Batch size for broadcasting client transactions to peers.
    pub max_broadcast_txs: usize,
}

impl Default for TxPoolConfig {
    fn default() -> Self {
        Self {
            chain_id: "chain0".to_string(),
            group_id: "group0".to_string(),
            pool_limit: 15_000,
            block_limit: 1000,
            notifier_worker_num: 1,
            verify_worker_num: 1,
            network_timeout: Duration::from_millis(200),
            forward_percent: 25,
            max_broadcast_txs: 1000,
        }
    }
}

impl TxPoolConfig {
    /// Small limits for tests.
    pub fn for_testing() -> Self {
        Self {
            pool_limit: 100,
            block_limit: 10,
            network_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }
}
