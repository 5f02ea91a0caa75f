//! League kernel
//!
//! Owns a league's feed provider and the validators of its modes, and starts
//! and stops them together. The manual league has neither.

use super::catalog;
use super::runtime::{Validator, ValidatorDeps};
use crate::domain::{League, ModeKey};
use crate::feed::GameFeedProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct LeagueKernel {
    league: League,
    provider: Option<Arc<GameFeedProvider>>,
    validators: Vec<Arc<dyn Validator>>,
    validator_tasks: Mutex<Vec<JoinHandle<()>>>,
    feed_task: Mutex<Option<JoinHandle<()>>>,
}

impl LeagueKernel {
    /// Build validators for every mode of the league
    pub fn new(league: League, provider: Option<Arc<GameFeedProvider>>, deps: ValidatorDeps) -> Self {
        let validators = ModeKey::for_league(league)
            .into_iter()
            .filter_map(|mode| catalog::validator_for(mode, deps.clone()))
            .collect();
        Self {
            league,
            provider,
            validators,
            validator_tasks: Mutex::new(Vec::new()),
            feed_task: Mutex::new(None),
        }
    }

    pub fn league(&self) -> League {
        self.league
    }

    pub fn provider(&self) -> Option<&Arc<GameFeedProvider>> {
        self.provider.as_ref()
    }

    pub fn validator(&self, mode: ModeKey) -> Option<&Arc<dyn Validator>> {
        self.validators.iter().find(|v| v.mode() == mode)
    }

    pub fn validators(&self) -> &[Arc<dyn Validator>] {
        &self.validators
    }

    /// Validators subscribe before the feed starts so no update is missed
    pub async fn start(&self) {
        let mut tasks = self.validator_tasks.lock().await;
        for validator in &self.validators {
            let updates = self.provider.as_ref().map(|p| p.subscribe());
            tasks.push(Arc::clone(validator).start(updates));
        }
        if let Some(provider) = &self.provider {
            *self.feed_task.lock().await = Some(provider.start());
        }
        info!(
            league = %self.league,
            validators = self.validators.len(),
            feed = self.provider.is_some(),
            "League kernel started"
        );
    }

    pub async fn stop_validators(&self, timeout: Duration) {
        for validator in &self.validators {
            validator.stop();
        }
        let tasks: Vec<_> = self.validator_tasks.lock().await.drain(..).collect();
        if tokio::time::timeout(timeout, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            warn!(league = %self.league, "Validators did not stop within {:?}", timeout);
        }
    }

    pub async fn stop_feed(&self, timeout: Duration) {
        let Some(provider) = &self.provider else {
            return;
        };
        provider.stop();
        if let Some(task) = self.feed_task.lock().await.take() {
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!(league = %self.league, "Feed provider did not stop within {:?}", timeout);
            }
        }
    }
}
