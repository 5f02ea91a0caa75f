use super::provider::GameFeedProvider;
use crate::domain::League;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Feed providers by league
///
/// Built once at startup and handed to the league kernels; there is no
/// global provider lookup.
#[derive(Default)]
pub struct FeedRegistry {
    providers: DashMap<League, Arc<GameFeedProvider>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider; replaces any previous one for the league
    pub fn register(&self, provider: Arc<GameFeedProvider>) {
        let league = provider.league();
        if self.providers.insert(league, provider).is_some() {
            info!(league = %league, "Replaced feed provider");
        }
    }

    pub fn get(&self, league: League) -> Option<Arc<GameFeedProvider>> {
        self.providers.get(&league).map(|p| Arc::clone(p.value()))
    }

    pub fn leagues(&self) -> Vec<League> {
        let mut leagues: Vec<League> = self.providers.iter().map(|p| *p.key()).collect();
        leagues.sort_by_key(|l| l.as_str());
        leagues
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
