//! Persistence Layer for wager state, jobs and caches
//!
//! This module defines the storage seams the engine runs against:
//! - Bet store and audit log traits (transactional lifecycle transitions)
//! - Durable resolution job queue
//! - Durable cache with in-memory fallback
//! - Baseline and game snapshot stores built on the cache
//! - Postgres-backed resolution history

pub mod cache;
pub mod event_store;
pub mod queue;
pub mod snapshots;
pub mod store;

pub use cache::{DurableCache, FallbackCache, MemoryCache};
pub use event_store::PgAuditLog;
pub use queue::{JobQueue, QueueStats};
pub use snapshots::{Baseline, BaselineStore, GameSnapshotStore};
pub use store::{AuditLog, BetStore, TransitionOutcome};
