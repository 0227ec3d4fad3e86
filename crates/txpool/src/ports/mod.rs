//! Driving and driven ports for the transaction pool.

pub mod inbound;
pub mod outbound;

pub use inbound::TxPoolApi;
pub use outbound::{FrontError, FrontService, Ledger, LedgerError, SealerError, SealerGateway};
