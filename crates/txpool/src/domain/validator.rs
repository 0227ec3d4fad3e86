//! Layered admission checks, short-circuiting on the first failure.

use crate::domain::entities::PoolTransaction;
use crate::domain::nonce::{LedgerNonceChecker, PoolNonceChecker};
use shared_types::{Transaction, TxStatus};
use std::sync::Arc;

/// Composes the nonce windows with identity and signature checks into a
/// single admission verdict.
pub struct TxValidator {
    pool_nonce_checker: Arc<PoolNonceChecker>,
    ledger_nonce_checker: Arc<LedgerNonceChecker>,
    chain_id: String,
    group_id: String,
}

impl TxValidator {
    pub fn new(
        pool_nonce_checker: Arc<PoolNonceChecker>,
        ledger_nonce_checker: Arc<LedgerNonceChecker>,
        chain_id: String,
        group_id: String,
    ) -> Self {
        Self {
            pool_nonce_checker,
            ledger_nonce_checker,
            chain_id,
            group_id,
        }
    }

    /// Full admission verdict, in order: invalid flag, pool nonce, ledger
    /// nonce and block limit, group id, chain id, signature.
    pub fn verify(&self, entry: &PoolTransaction) -> TxStatus {
        if entry.is_invalid() {
            return TxStatus::InvalidSignature;
        }
        let tx = entry.transaction();
        let status = self.pool_nonce_checker.check(tx);
        if !status.is_ok() {
            return status;
        }
        let status = self.ledger_nonce_checker.check(tx);
        if !status.is_ok() {
            return status;
        }
        if tx.group_id != self.group_id {
            return TxStatus::InvalidGroupId;
        }
        if tx.chain_id != self.chain_id {
            return TxStatus::InvalidChainId;
        }
        if tx.verify().is_err() {
            return TxStatus::InvalidSignature;
        }
        TxStatus::Ok
    }

    /// Cheap re-check used by the sealer's scan: has the nonce been mined
    /// within the ledger window, and is the block limit still live? No
    /// signature recomputation.
    pub fn submitted_to_chain(&self, tx: &Transaction) -> TxStatus {
        self.ledger_nonce_checker.check(tx)
    }

    /// The in-pool nonce window.
    pub fn pool_nonce_checker(&self) -> &Arc<PoolNonceChecker> {
        &self.pool_nonce_checker
    }

    /// The on-chain nonce window.
    pub fn ledger_nonce_checker(&self) -> &Arc<LedgerNonceChecker> {
        &self.ledger_nonce_checker
    }
}
