use chrono::Utc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::info;

/// Metrics collector for observability
pub struct Metrics {
    /// Wagers moved active -> pending
    pub bets_closed: AtomicU64,
    pub bets_resolved: AtomicU64,
    pub bets_washed: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_retried: AtomicU64,
    pub jobs_failed: AtomicU64,
    /// Upstream poll attempts across all leagues
    pub feed_polls: AtomicU64,
    pub feed_failures: AtomicU64,
    /// Games published after a signature change
    pub games_published: AtomicU64,
    /// Decisions enqueued by validators
    pub validator_decisions: AtomicU64,
    /// Unix seconds of the last processed job
    last_job_at: AtomicI64,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            bets_closed: AtomicU64::new(0),
            bets_resolved: AtomicU64::new(0),
            bets_washed: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            feed_polls: AtomicU64::new(0),
            feed_failures: AtomicU64::new(0),
            games_published: AtomicU64::new(0),
            validator_decisions: AtomicU64::new(0),
            last_job_at: AtomicI64::new(0),
        }
    }

    pub fn inc_bets_closed(&self) {
        self.bets_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_bets_resolved(&self) {
        self.bets_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_bets_washed(&self) {
        self.bets_washed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_jobs_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.touch_job();
    }

    pub fn inc_jobs_retried(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
        self.touch_job();
    }

    pub fn inc_jobs_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        self.touch_job();
    }

    pub fn inc_feed_polls(&self) {
        self.feed_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_feed_failures(&self) {
        self.feed_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_games_published(&self) {
        self.games_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_validator_decisions(&self) {
        self.validator_decisions.fetch_add(1, Ordering::Relaxed);
    }

    fn touch_job(&self) {
        self.last_job_at
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    /// Seconds since the last processed job, if any
    pub fn seconds_since_last_job(&self) -> Option<i64> {
        match self.last_job_at.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(Utc::now().timestamp() - ts),
        }
    }

    /// Get current metrics as a formatted string
    pub fn summary(&self) -> String {
        format!(
            r#"
=== WAGERD STATUS ===
Bets: {} closed | {} resolved | {} washed
Jobs: {} completed | {} retried | {} failed
Feeds: {} polls | {} failures | {} games published
Validator decisions: {}
=====================
"#,
            self.bets_closed.load(Ordering::Relaxed),
            self.bets_resolved.load(Ordering::Relaxed),
            self.bets_washed.load(Ordering::Relaxed),
            self.jobs_completed.load(Ordering::Relaxed),
            self.jobs_retried.load(Ordering::Relaxed),
            self.jobs_failed.load(Ordering::Relaxed),
            self.feed_polls.load(Ordering::Relaxed),
            self.feed_failures.load(Ordering::Relaxed),
            self.games_published.load(Ordering::Relaxed),
            self.validator_decisions.load(Ordering::Relaxed),
        )
    }

    /// Export counters in Prometheus format
    pub fn prometheus(&self) -> String {
        let counters = [
            ("wagerd_bets_closed_total", "Wagers moved to pending", &self.bets_closed),
            ("wagerd_bets_resolved_total", "Wagers resolved", &self.bets_resolved),
            ("wagerd_bets_washed_total", "Wagers washed", &self.bets_washed),
            ("wagerd_jobs_completed_total", "Resolution jobs completed", &self.jobs_completed),
            ("wagerd_jobs_retried_total", "Resolution job retries", &self.jobs_retried),
            ("wagerd_jobs_failed_total", "Resolution jobs failed permanently", &self.jobs_failed),
            ("wagerd_feed_polls_total", "Upstream feed polls", &self.feed_polls),
            ("wagerd_feed_failures_total", "Upstream feed failures", &self.feed_failures),
            ("wagerd_games_published_total", "Game updates published", &self.games_published),
            (
                "wagerd_validator_decisions_total",
                "Decisions enqueued by validators",
                &self.validator_decisions,
            ),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n\n",
                value.load(Ordering::Relaxed)
            ));
        }
        if let Some(secs) = self.seconds_since_last_job() {
            out.push_str(&format!(
                "# HELP wagerd_seconds_since_last_job Seconds since a worker last finished a job\n# TYPE wagerd_seconds_since_last_job gauge\nwagerd_seconds_since_last_job {}\n",
                secs
            ));
        }
        out
    }

    /// Log periodic status
    pub fn log_status(&self) {
        info!("{}", self.summary());
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.inc_bets_resolved();
        metrics.inc_jobs_failed();

        let text = metrics.prometheus();
        assert!(text.contains("wagerd_bets_resolved_total 1"));
        assert!(text.contains("# TYPE wagerd_jobs_failed_total counter"));
        assert!(metrics.seconds_since_last_job().is_some());
    }
}
