//! Core pool domain: entries, nonce windows, validation, and the store.

pub mod entities;
pub mod nonce;
pub mod store;
pub mod validator;

pub use entities::{PoolTransaction, TxSubmitCallback};
pub use nonce::{LedgerNonceChecker, PoolNonceChecker};
pub use store::PoolStore;
pub use validator::TxValidator;
