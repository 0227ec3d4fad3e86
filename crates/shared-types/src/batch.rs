//! # Transaction Batch Container
//!
//! The container block that carries full transaction bodies on the wire:
//! pool broadcasts, hash-request responses, and proposal payloads all
//! round-trip through the same bincode encoding.

use crate::entities::{Hash, Transaction};
use crate::errors::CodecError;
use serde::{Deserialize, Serialize};

/// An ordered batch of full transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxBatch {
    /// Transactions in responder/producer order.
    pub transactions: Vec<Transaction>,
}

impl TxBatch {
    /// Create a batch from transactions.
    pub fn new(transactions: Vec<Transaction>) -> Self {
        Self { transactions }
    }

    /// Number of transactions in the batch.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// True when the batch carries no transactions.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Hashes of the carried transactions, in order.
    pub fn hashes(&self) -> Vec<Hash> {
        self.transactions.iter().map(|tx| tx.hash()).collect()
    }

    /// Encode with bincode.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode from bincode bytes.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(data).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// A proposal as handed to the pool for verification: block identity plus
/// the hashes of the transactions it includes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalBlock {
    /// Block number the proposal is for.
    pub block_number: u64,
    /// Hash of the proposed block.
    pub block_hash: Hash,
    /// Hashes of the included transactions, in block order.
    pub tx_hashes: Vec<Hash>,
}

impl ProposalBlock {
    /// Create a proposal container.
    pub fn new(block_number: u64, block_hash: Hash, tx_hashes: Vec<Hash>) -> Self {
        Self {
            block_number,
            block_hash,
            tx_hashes,
        }
    }

    /// Encode with bincode.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Decode from bincode bytes.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        bincode::deserialize(data).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
