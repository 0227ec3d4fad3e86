//! # Transaction Pool Subsystem
//!
//! Accepts transactions from clients and peers, validates them, stores
//! pending transactions in memory, serves them to the block sealer and the
//! block verifier, and synchronizes pool contents with consensus peers.
//!
//! ## Domain Invariants
//!
//! - Every hash addresses at most one pool entry.
//! - An entry's nonce is in the pool nonce window exactly while the entry
//!   exists.
//! - The sealed count never exceeds the pool size, and the unsealed size
//!   never underflows.
//! - A submit callback fires exactly once per transaction: on admission
//!   failure, on the final on-chain result, or on eviction with a terminal
//!   status.
//! - Entries flagged invalid are never handed to the sealer or to peers.
//! - After a block commits, the nonces of its transactions move from the
//!   pool window to the ledger window at that block number.
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  service.rs  - TxPool facade wiring store, validator, and sync  │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ports/inbound.rs  - TxPoolApi trait                            │
//! │  ports/outbound.rs - Ledger, FrontService, SealerGateway traits │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  domain/entities.rs  - PoolTransaction and its lifecycle flags  │
//! │  domain/nonce.rs     - pool and ledger nonce windows            │
//! │  domain/validator.rs - layered admission checks                 │
//! │  domain/store.rs     - concurrent pool store                    │
//! │  sync/               - wire packets, membership, sync engine    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod domain;
pub mod ports;
pub mod service;
pub mod sync;

pub use config::TxPoolConfig;
pub use domain::entities::{PoolTransaction, TxSubmitCallback};
pub use domain::store::PoolStore;
pub use domain::validator::TxValidator;
pub use service::TxPool;
pub use sync::{SyncEngine, SyncError};
