//! # Shared Types Crate
//!
//! Domain entities and wire types shared by the transaction pool crates.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every type that crosses a crate boundary
//!   (transactions, submit results, the batch container) is defined here.
//! - **Stable Keys**: a transaction's 32-byte SHA-256 digest is its identity
//!   everywhere - in the pool, on the wire, and in submit results.
//! - **Opaque Nonces**: client-chosen `U256` nonces are replay markers, not
//!   per-sender counters.

pub mod batch;
pub mod entities;
pub mod errors;

pub use batch::{ProposalBlock, TxBatch};
pub use entities::*;
pub use errors::CodecError;
