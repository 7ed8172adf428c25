//! Funding bridge: convert an external asset into XRP delivered to a wallet.

pub mod client;
pub mod ledger;
pub mod quote;
pub mod retry;
pub mod tracker;
pub mod types;

pub use client::{BridgeApi, BridgeExchangeClient, HttpBridge};
pub use ledger::{ExchangeLedger, LedgerEntry};
pub use quote::QuoteDebouncer;
pub use retry::RetryPolicy;
pub use tracker::{ExchangeStatusTracker, StatusObservation, DEFAULT_POLL_INTERVAL};
pub use types::{Currency, ExchangeStatus, ExchangeTransaction, Quote, StatusReport};
