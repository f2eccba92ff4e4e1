pub mod error;
pub mod service;
pub mod thresholds;

pub use error::LedgerError;
pub use service::TransferLedger;
pub use thresholds::{evaluate, Decision, Latches, Thresholds};
