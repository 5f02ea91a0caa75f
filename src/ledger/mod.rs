//! Escrow ledger
//!
//! - `escrow`: pure balance math for close, resolve and wash
//! - `transitions`: status guards and audit payloads used by the stores
//! - `service`: the transition entry point used by jobs and the sweep

pub mod escrow;
pub mod service;
pub mod transitions;

pub use escrow::{ClosePlan, EscrowLine, SettleLine, SettlePlan};
pub use service::LedgerService;
