pub mod engine;
pub mod health;
pub mod metrics;
pub mod scheduler;
pub mod wagers;
pub mod worker;

pub use engine::Engine;
pub use health::{ComponentHealth, HealthResponse, HealthServer, HealthState, HealthStatus};
pub use metrics::Metrics;
pub use scheduler::{LifecycleScheduler, SweepSummary};
pub use wagers::WagerService;
pub use worker::{JobDisposition, JobHandler, LedgerJobHandler, WorkerPool};
