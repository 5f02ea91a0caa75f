pub mod espn;
pub mod memory;
pub mod nba_cdn;
pub mod postgres;
pub mod postgres_cache;
pub mod postgres_queue;
pub mod transaction_manager;

pub use espn::EspnNflSource;
pub use memory::{MemoryJobQueue, MemoryStore};
pub use nba_cdn::NbaCdnSource;
pub use postgres::{PostgresStore, STATUS_CHANNEL};
pub use postgres_cache::PostgresCache;
pub use postgres_queue::PostgresJobQueue;
pub use transaction_manager::{ManagedTransaction, TransactionManager, TransactionScope};
