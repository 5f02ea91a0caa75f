//! Coordination Layer for long-running operation
//!
//! - Circuit breaker around upstream feed calls
//! - Graceful shutdown in dependency order

pub mod circuit_breaker;
pub mod shutdown;

pub use circuit_breaker::{CircuitBreakerStats, CircuitState, FeedCircuitBreaker, TripReason};
pub use shutdown::{
    install_signal_handlers, GracefulShutdown, PhaseFuture, ShutdownConfig, ShutdownPhase,
    ShutdownSignal,
};
