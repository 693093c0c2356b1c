use std::time::{Duration, SystemTime};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;

use crate::dao::{
    models::{FinalResultsEntity, PlayerEntity, ScoreEntryEntity, SessionEntity},
    session_store::SessionStore,
    storage::StorageResult,
};

/// In-process store keeping all session state in concurrent maps.
///
/// Used for tests and as the fallback backend when no database is configured.
/// Expiry relies on the periodic sweep driven by the storage supervisor.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, SessionEntity>,
    players: DashMap<String, Vec<PlayerEntity>>,
    scores: DashMap<String, Vec<ScoreEntryEntity>>,
    results: DashMap<String, FinalResultsEntity>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn drop_session_keys(&self, pin: &str) {
        self.sessions.remove(pin);
        self.players.remove(pin);
        self.scores.remove(pin);
    }
}

impl SessionStore for MemorySessionStore {
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let created = match self.sessions.entry(session.pin.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        };
        Box::pin(async move { Ok(created) })
    }

    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.sessions.insert(session.pin.clone(), session);
        Box::pin(async move { Ok(()) })
    }

    fn find_session(&self, pin: &str) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let found = self.sessions.get(pin).map(|entry| entry.value().clone());
        Box::pin(async move { Ok(found) })
    }

    fn delete_session(&self, pin: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let existed = self.sessions.contains_key(pin);
        self.drop_session_keys(pin);
        Box::pin(async move { Ok(existed) })
    }

    fn touch_session(&self, pin: &str, ttl: Duration) -> BoxFuture<'static, StorageResult<()>> {
        if let Some(mut entry) = self.sessions.get_mut(pin) {
            entry.expires_at = SystemTime::now() + ttl;
        }
        Box::pin(async move { Ok(()) })
    }

    fn upsert_player(
        &self,
        pin: &str,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let mut roster = self.players.entry(pin.to_owned()).or_default();
        match roster.iter_mut().find(|known| known.name == player.name) {
            Some(slot) => *slot = player,
            None => roster.push(player),
        }
        drop(roster);
        Box::pin(async move { Ok(()) })
    }

    fn remove_player(&self, pin: &str, name: &str) -> BoxFuture<'static, StorageResult<()>> {
        if let Some(mut roster) = self.players.get_mut(pin) {
            roster.retain(|player| player.name != name);
        }
        Box::pin(async move { Ok(()) })
    }

    fn players(&self, pin: &str) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let roster = self
            .players
            .get(pin)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        Box::pin(async move { Ok(roster) })
    }

    fn record_score(
        &self,
        pin: &str,
        entry: ScoreEntryEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        // Entry append and total bump happen under the same shard guard so a
        // concurrent reader never observes one without the other.
        let mut entries = self.scores.entry(pin.to_owned()).or_default();
        if let Some(mut roster) = self.players.get_mut(pin)
            && let Some(player) = roster.iter_mut().find(|known| known.name == entry.player)
        {
            player.score += entry.points;
        }
        entries.push(entry);
        drop(entries);
        Box::pin(async move { Ok(()) })
    }

    fn score_entries(&self, pin: &str) -> BoxFuture<'static, StorageResult<Vec<ScoreEntryEntity>>> {
        let entries = self
            .scores
            .get(pin)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        Box::pin(async move { Ok(entries) })
    }

    fn save_results(&self, results: FinalResultsEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.results.insert(results.pin.clone(), results);
        Box::pin(async move { Ok(()) })
    }

    fn find_results(
        &self,
        pin: &str,
    ) -> BoxFuture<'static, StorageResult<Option<FinalResultsEntity>>> {
        let found = self.results.get(pin).map(|entry| entry.value().clone());
        Box::pin(async move { Ok(found) })
    }

    fn sweep_expired(&self) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let now = SystemTime::now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().expires_at <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for pin in &expired {
            self.drop_session_keys(pin);
        }
        Box::pin(async move { Ok(expired) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async move { Ok(()) })
    }
}
