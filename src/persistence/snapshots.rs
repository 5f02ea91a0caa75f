//! Baseline and game snapshot storage
//!
//! Baselines are captured once per wager when it enters `pending` and live in
//! the durable cache until the wager settles. Game snapshots are written by
//! one feed provider per league and read by every validator.

use super::cache::DurableCache;
use crate::domain::{GameSnapshot, League, ModeKey};
use crate::error::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Mode-specific stats captured when a wager entered `pending`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub bet_id: Uuid,
    pub mode: ModeKey,
    pub game_id: String,
    pub captured_at: DateTime<Utc>,
    pub stats: serde_json::Value,
}

fn baseline_key(bet_id: Uuid) -> String {
    format!("baseline:{}", bet_id)
}

fn signature_key(mode: ModeKey, game_id: &str) -> String {
    format!("sig:{}:{}", mode, game_id)
}

fn snapshot_key(league: League, game_id: &str) -> String {
    format!("snapshot:{}:{}", league, game_id)
}

pub struct BaselineStore {
    cache: Arc<dyn DurableCache>,
    ttl: Duration,
    signature_ttl: Duration,
}

impl BaselineStore {
    pub fn new(cache: Arc<dyn DurableCache>, ttl: Duration, signature_ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            signature_ttl,
        }
    }

    pub async fn save(&self, baseline: &Baseline) -> Result<()> {
        let value = serde_json::to_value(baseline)?;
        self.cache
            .set(&baseline_key(baseline.bet_id), value, Some(self.ttl))
            .await?;
        debug!(bet_id = %baseline.bet_id, mode = %baseline.mode, "Baseline saved");
        Ok(())
    }

    pub async fn load(&self, bet_id: Uuid) -> Result<Option<Baseline>> {
        let Some(value) = self.cache.get(&baseline_key(bet_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(baseline) => Ok(Some(baseline)),
            Err(e) => {
                // Unreadable entries are treated as missing and recaptured
                warn!(bet_id = %bet_id, "Discarding unreadable baseline: {}", e);
                self.cache.delete(&baseline_key(bet_id)).await?;
                Ok(None)
            }
        }
    }

    pub async fn delete(&self, bet_id: Uuid) -> Result<()> {
        self.cache.delete(&baseline_key(bet_id)).await
    }

    /// Last game signature a mode acted on
    pub async fn last_signature(&self, mode: ModeKey, game_id: &str) -> Result<Option<String>> {
        let value = self.cache.get(&signature_key(mode, game_id)).await?;
        Ok(value.and_then(|v| v.as_str().map(str::to_string)))
    }

    pub async fn set_signature(&self, mode: ModeKey, game_id: &str, signature: &str) -> Result<()> {
        self.cache
            .set(
                &signature_key(mode, game_id),
                serde_json::Value::String(signature.to_string()),
                Some(self.signature_ttl),
            )
            .await
    }
}

/// Latest snapshot per game
///
/// Single writer (the league's feed provider), many readers.
pub struct GameSnapshotStore {
    games: DashMap<(League, String), Arc<GameSnapshot>>,
    cache: Arc<dyn DurableCache>,
    ttl: Duration,
}

impl GameSnapshotStore {
    pub fn new(cache: Arc<dyn DurableCache>, ttl: Duration) -> Self {
        Self {
            games: DashMap::new(),
            cache,
            ttl,
        }
    }

    /// Store a snapshot; returns false when the signature did not change
    pub async fn put(&self, snapshot: GameSnapshot) -> Result<bool> {
        let key = (snapshot.league, snapshot.game_id.clone());
        if let Some(existing) = self.games.get(&key) {
            if existing.signature == snapshot.signature {
                return Ok(false);
            }
        }

        let value = serde_json::to_value(&snapshot)?;
        let cache_key = snapshot_key(snapshot.league, &snapshot.game_id);
        // Held in memory only once durable, so a failed write is retried
        self.cache.set(&cache_key, value, Some(self.ttl)).await?;
        self.games.insert(key, Arc::new(snapshot));
        Ok(true)
    }

    pub fn get(&self, league: League, game_id: &str) -> Option<Arc<GameSnapshot>> {
        self.games
            .get(&(league, game_id.to_string()))
            .map(|g| Arc::clone(g.value()))
    }

    /// Memory first, then the durable cache (cold start)
    pub async fn fetch(&self, league: League, game_id: &str) -> Result<Option<Arc<GameSnapshot>>> {
        if let Some(game) = self.get(league, game_id) {
            return Ok(Some(game));
        }
        let Some(value) = self.cache.get(&snapshot_key(league, game_id)).await? else {
            return Ok(None);
        };
        let snapshot: GameSnapshot = match serde_json::from_value(value) {
            Ok(s) => s,
            Err(e) => {
                warn!(league = %league, game_id, "Discarding unreadable snapshot: {}", e);
                return Ok(None);
            }
        };
        let snapshot = Arc::new(snapshot);
        self.games
            .insert((league, game_id.to_string()), Arc::clone(&snapshot));
        Ok(Some(snapshot))
    }

    /// Games currently held for a league
    pub fn games(&self, league: League) -> Vec<Arc<GameSnapshot>> {
        self.games
            .iter()
            .filter(|e| e.key().0 == league)
            .map(|e| Arc::clone(e.value()))
            .collect()
    }
}
