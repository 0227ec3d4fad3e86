//! # Core Domain Entities
//!
//! The transaction type accepted by the pool, the identifiers it is keyed
//! by, and the submit-result value delivered back to submitters.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_crypto::{CryptoError, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};

// Re-export U256 from primitive-types; transaction nonces are opaque 256-bit
// values chosen by the client.
pub use primitive_types::U256;

/// A 32-byte SHA-256 hash.
pub type Hash = [u8; 32];

/// A 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// A 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// Unique identifier for a node in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Short hex form for logging.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

/// Short hex form of a hash for logging.
pub fn abridged(hash: &Hash) -> String {
    hex::encode(&hash[..4])
}

/// A signed transaction as submitted by a client or relayed by a peer.
///
/// The signature covers the digest of every other field, so the digest
/// doubles as the pool key and the signing preimage.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    /// Chain the transaction is bound to; compared exactly on admission.
    pub chain_id: String,
    /// Group within the chain; compared exactly on admission.
    pub group_id: String,
    /// Highest block number at which this transaction may still be included.
    pub block_limit: u64,
    /// Client-chosen replay marker, unique within the nonce windows.
    pub nonce: U256,
    /// Submitter's Ed25519 public key.
    pub from: PublicKey,
    /// Opaque call payload.
    pub payload: Vec<u8>,
    /// Ed25519 signature over `digest()`.
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

impl Transaction {
    /// Build and sign a transaction with the given keypair.
    pub fn signed(
        keypair: &Ed25519KeyPair,
        chain_id: impl Into<String>,
        group_id: impl Into<String>,
        block_limit: u64,
        nonce: U256,
        payload: Vec<u8>,
    ) -> Self {
        let mut tx = Self {
            chain_id: chain_id.into(),
            group_id: group_id.into(),
            block_limit,
            nonce,
            from: *keypair.public_key().as_bytes(),
            payload,
            signature: [0u8; 64],
        };
        let digest = tx.digest();
        tx.signature = *keypair.sign(&digest).as_bytes();
        tx
    }

    /// Digest of the signed fields; the signing preimage.
    pub fn digest(&self) -> Hash {
        let mut nonce_bytes = [0u8; 32];
        self.nonce.to_big_endian(&mut nonce_bytes);
        shared_crypto::sha256_many(&[
            self.chain_id.as_bytes(),
            self.group_id.as_bytes(),
            &self.block_limit.to_le_bytes(),
            &nonce_bytes,
            &self.from,
            &self.payload,
        ])
    }

    /// The transaction hash, computed over digest and signature.
    ///
    /// Including the signature keeps distinct signatures over identical
    /// content addressable as distinct pool entries.
    pub fn hash(&self) -> Hash {
        shared_crypto::sha256_many(&[&self.digest(), &self.signature[..]])
    }

    /// Verify the submitter signature.
    pub fn verify(&self) -> Result<(), CryptoError> {
        let public_key = Ed25519PublicKey::from_bytes(self.from)?;
        let signature = Ed25519Signature::from_bytes(self.signature);
        public_key.verify(&self.digest(), &signature)
    }
}

/// Admission verdict and terminal submit status for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    /// Accepted, or committed on-chain when carried by a submit result.
    Ok,
    /// Decoding the transaction bytes failed.
    Malformed,
    /// Signature verification failed, or the entry was flagged invalid.
    InvalidSignature,
    /// Chain identity mismatch.
    InvalidChainId,
    /// Group identity mismatch.
    InvalidGroupId,
    /// Nonce already present in the pool or mined within the ledger window.
    NonceCheckFail,
    /// `block_limit` outside `(tip, tip + block_limit]`.
    BlockLimitCheckFail,
    /// Hash already present in the pool.
    AlreadyInPool,
    /// Pool at capacity.
    PoolIsFull,
    /// The local node is not in the consensus or observer set.
    NotInGroup,
    /// Referenced transactions could not all be located.
    TxsMissing,
}

impl TxStatus {
    /// True for the success verdict.
    pub fn is_ok(&self) -> bool {
        matches!(self, TxStatus::Ok)
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TxStatus::Ok => "Ok",
            TxStatus::Malformed => "Malformed",
            TxStatus::InvalidSignature => "InvalidSignature",
            TxStatus::InvalidChainId => "InvalidChainId",
            TxStatus::InvalidGroupId => "InvalidGroupId",
            TxStatus::NonceCheckFail => "NonceCheckFail",
            TxStatus::BlockLimitCheckFail => "BlockLimitCheckFail",
            TxStatus::AlreadyInPool => "AlreadyInPool",
            TxStatus::PoolIsFull => "PoolIsFull",
            TxStatus::NotInGroup => "NotInGroup",
            TxStatus::TxsMissing => "TxsMissing",
        };
        f.write_str(name)
    }
}

/// Terminal result delivered to a transaction submitter, exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSubmitResult {
    /// Hash of the submitted transaction (zeroed when decoding failed).
    pub tx_hash: Hash,
    /// Terminal status.
    pub status: TxStatus,
    /// Block the transaction was committed in, when `status` is `Ok`.
    pub block_number: Option<u64>,
    /// Hash of that block.
    pub block_hash: Option<Hash>,
}

impl TxSubmitResult {
    /// Result for a transaction rejected before or after admission.
    pub fn rejected(tx_hash: Hash, status: TxStatus) -> Self {
        Self {
            tx_hash,
            status,
            block_number: None,
            block_hash: None,
        }
    }

    /// Result for a transaction committed on-chain.
    pub fn committed(tx_hash: Hash, block_number: u64, block_hash: Hash) -> Self {
        Self {
            tx_hash,
            status: TxStatus::Ok,
            block_number: Some(block_number),
            block_hash: Some(block_hash),
        }
    }
}
