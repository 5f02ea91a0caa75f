//! Health check HTTP server for 24/7 production monitoring
//!
//! Provides liveness and readiness probes for process supervision, a
//! Prometheus metrics endpoint and a read-only view of a wager's audit trail.

use crate::coordination::CircuitState;
use crate::domain::AuditEvent;
use crate::error::WagerError;
use crate::feed::FeedRegistry;
use crate::persistence::{FallbackCache, JobQueue, QueueStats};
use crate::services::wagers::WagerService;
use crate::services::Metrics;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// The worse of two statuses
    fn worst(self, other: HealthStatus) -> HealthStatus {
        use HealthStatus::*;
        match (self, other) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Degraded, _) | (_, Degraded) => Degraded,
            _ => Healthy,
        }
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

/// Overall system health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
    pub jobs_queued: u64,
    pub jobs_failed: u64,
}

/// Shared state for health server
pub struct HealthState {
    pub started_at: DateTime<Utc>,
    queue: Arc<dyn JobQueue>,
    feeds: Arc<FeedRegistry>,
    cache: Arc<FallbackCache>,
    metrics: Arc<Metrics>,
    wagers: Arc<WagerService>,
}

impl HealthState {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        feeds: Arc<FeedRegistry>,
        cache: Arc<FallbackCache>,
        metrics: Arc<Metrics>,
        wagers: Arc<WagerService>,
    ) -> Self {
        Self {
            started_at: Utc::now(),
            queue,
            feeds,
            cache,
            metrics,
            wagers,
        }
    }

    /// Get overall health status
    pub async fn get_health(&self) -> HealthResponse {
        let now = Utc::now();
        let mut components = Vec::new();

        // Queue reachability doubles as the database check
        let stats = self.queue.stats().await;
        components.push(match &stats {
            Ok(_) => ComponentHealth {
                name: "job_queue".to_string(),
                status: HealthStatus::Healthy,
                message: None,
                last_check: Some(now),
            },
            Err(e) => ComponentHealth {
                name: "job_queue".to_string(),
                status: HealthStatus::Unhealthy,
                message: Some(e.to_string()),
                last_check: Some(now),
            },
        });
        let stats = stats.unwrap_or_default();

        for league in self.feeds.leagues() {
            let Some(provider) = self.feeds.get(league) else {
                continue;
            };
            let breaker = provider.breaker().state().await;
            // A tripped feed only delays resolution; the host can still override
            let status = match breaker {
                CircuitState::Closed => HealthStatus::Healthy,
                CircuitState::HalfOpen | CircuitState::Open => HealthStatus::Degraded,
            };
            let failures = provider.consecutive_failures();
            components.push(ComponentHealth {
                name: format!("feed_{}", league),
                status,
                message: (status != HealthStatus::Healthy || failures > 0).then(|| {
                    format!("breaker {}, {} consecutive failures", breaker, failures)
                }),
                last_check: Some(now),
            });
        }

        let degraded = self.cache.is_degraded();
        components.push(ComponentHealth {
            name: "cache".to_string(),
            status: if degraded {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            message: degraded.then(|| {
                format!(
                    "in-memory fallback ({} durable errors)",
                    self.cache.primary_errors()
                )
            }),
            last_check: Some(now),
        });

        let status = components
            .iter()
            .fold(HealthStatus::Healthy, |acc, c| acc.worst(c.status));

        HealthResponse {
            status,
            timestamp: now,
            uptime_seconds: (now - self.started_at).num_seconds().max(0) as u64,
            components,
            jobs_queued: stats.queued,
            jobs_failed: stats.failed,
        }
    }

    async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await.unwrap_or_default()
    }
}

/// Routes served by the health server
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/bets/:bet_id/audit", get(audit_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check server
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Start the health server
    pub async fn run(&self) -> crate::Result<()> {
        let app = router(Arc::clone(&self.state));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting health server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| WagerError::Internal(format!("Health server error: {}", e)))?;

        Ok(())
    }

    pub fn state(&self) -> Arc<HealthState> {
        Arc::clone(&self.state)
    }
}

/// Full health check endpoint
async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

/// Liveness probe
async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe
async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match state.get_health().await.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Prometheus metrics endpoint
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let stats = state.queue_stats().await;
    let up = match health.status {
        HealthStatus::Healthy => 1,
        HealthStatus::Degraded => 0,
        HealthStatus::Unhealthy => -1,
    };

    let mut body = format!(
        r#"# HELP wagerd_up Health status (1=healthy, 0=degraded, -1=unhealthy)
# TYPE wagerd_up gauge
wagerd_up {}

# HELP wagerd_uptime_seconds Uptime in seconds
# TYPE wagerd_uptime_seconds counter
wagerd_uptime_seconds {}

# HELP wagerd_jobs Resolution jobs by status
# TYPE wagerd_jobs gauge
wagerd_jobs{{status="queued"}} {}
wagerd_jobs{{status="running"}} {}
wagerd_jobs{{status="failed"}} {}

# HELP wagerd_cache_degraded Durable cache fallback in use
# TYPE wagerd_cache_degraded gauge
wagerd_cache_degraded {}

"#,
        up,
        health.uptime_seconds,
        stats.queued,
        stats.running,
        stats.failed,
        u8::from(state.cache.is_degraded()),
    );
    body.push_str(&state.metrics.prometheus());

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Audit trail for one wager, oldest first
async fn audit_handler(
    State(state): State<Arc<HealthState>>,
    Path(bet_id): Path<Uuid>,
) -> Result<Json<Vec<AuditEvent>>, (StatusCode, Json<ErrorBody>)> {
    state.wagers.audit_trail(bet_id).await.map(Json).map_err(|e| {
        let code = match e {
            WagerError::BetNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, Json(ErrorBody { error: e.to_string() }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryJobQueue, MemoryStore};
    use crate::config::SchedulerConfig;
    use crate::domain::{BettingTable, ModeKey, NewWager};
    use crate::ledger::LedgerService;
    use crate::persistence::{BaselineStore, BetStore, MemoryCache};
    use crate::services::scheduler::LifecycleScheduler;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> (Arc<HealthState>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new(3));
        let ledger = Arc::new(LedgerService::new(
            store.clone(),
            Arc::new(BaselineStore::new(
                Arc::new(MemoryCache::new()),
                Duration::from_secs(60),
                Duration::from_secs(60),
            )),
            Arc::new(Metrics::new()),
        ));
        let scheduler = Arc::new(LifecycleScheduler::new(
            queue.clone(),
            ledger,
            SchedulerConfig::default(),
        ));
        let wagers = Arc::new(WagerService::new(
            store.clone(),
            store.clone(),
            queue.clone(),
            scheduler,
        ));
        let state = Arc::new(HealthState::new(
            queue,
            Arc::new(FeedRegistry::new()),
            Arc::new(FallbackCache::memory_only()),
            Arc::new(Metrics::new()),
            wagers,
        ));
        (state, store)
    }

    async fn get(state: Arc<HealthState>, uri: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_memory_only_cache_reports_degraded() {
        let (state, _) = state();
        let health = state.get_health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health
            .components
            .iter()
            .any(|c| c.name == "cache" && c.status == HealthStatus::Degraded));

        let (code, _) = get(state, "/readyz").await;
        assert_eq!(code, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (state, _) = state();
        let (code, body) = get(state, "/metrics").await;
        assert_eq!(code, StatusCode::OK);
        assert!(body.contains("wagerd_up 0"));
        assert!(body.contains("wagerd_jobs_completed_total 0"));
    }

    #[tokio::test]
    async fn test_audit_endpoint() {
        let (state, store) = state();

        let (code, _) = get(state.clone(), &format!("/bets/{}/audit", Uuid::new_v4())).await;
        assert_eq!(code, StatusCode::NOT_FOUND);

        let host = Uuid::new_v4();
        let table = BettingTable {
            id: Uuid::new_v4(),
            name: "Den".into(),
            host_user_id: host,
        };
        store.create_table(&table).await.unwrap();
        let wager = state
            .wagers
            .create_bet(
                NewWager {
                    table_id: table.id,
                    proposer_id: host,
                    wager_amount: dec!(1),
                    time_limit_seconds: 30,
                    mode_key: ModeKey::U2Pick,
                    league_game_id: None,
                    description: "Heads or tails".into(),
                    mode_config: serde_json::json!({"choices": ["Heads", "Tails"]}),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let (code, body) = get(state, &format!("/bets/{}/audit", wager.id)).await;
        assert_eq!(code, StatusCode::OK);
        let events: Vec<AuditEvent> = serde_json::from_str(&body).unwrap();
        assert!(events.is_empty());
    }
}
