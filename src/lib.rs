pub mod adapters;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod modes;
pub mod persistence;
pub mod services;

pub use config::AppConfig;
pub use coordination::{CircuitState, GracefulShutdown, ShutdownSignal};
pub use error::{Result, WagerError};
pub use ledger::LedgerService;
pub use modes::{Decision, LeagueKernel, ModeRules, Validator};
pub use persistence::{AuditLog, BetStore, JobQueue, TransitionOutcome};
pub use services::{Engine, LifecycleScheduler, WagerService, WorkerPool};
