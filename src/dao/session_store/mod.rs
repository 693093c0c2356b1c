/// Always-available in-memory backend with TTL bookkeeping.
pub mod memory;
#[cfg(feature = "mongo-store")]
/// MongoDB backend relying on a TTL index for expiration.
pub mod mongodb;

use std::time::Duration;

use crate::dao::models::{FinalResultsEntity, PlayerEntity, ScoreEntryEntity, SessionEntity};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;

/// Abstraction over the ephemeral persistence layer for live sessions.
///
/// Keys are scoped per PIN (`session:<PIN>` with `players` and `scores`
/// sub-collections); every live record carries a TTL. The per-session engine
/// is the only writer, so each method only needs to be atomic on its own.
pub trait SessionStore: Send + Sync {
    /// Insert a session if (and only if) its PIN is free. `false` means taken.
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<bool>>;
    /// Overwrite a session record, keeping its sub-collections untouched.
    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Load a session record by PIN.
    fn find_session(&self, pin: &str) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Delete a session and its sub-collections, releasing the PIN.
    fn delete_session(&self, pin: &str) -> BoxFuture<'static, StorageResult<bool>>;
    /// Push the session record's expiry out by `ttl` from now.
    fn touch_session(&self, pin: &str, ttl: Duration) -> BoxFuture<'static, StorageResult<()>>;

    /// Insert or update one player record of a session.
    fn upsert_player(
        &self,
        pin: &str,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Remove one player record of a session.
    fn remove_player(&self, pin: &str, name: &str) -> BoxFuture<'static, StorageResult<()>>;
    /// List the player records of a session.
    fn players(&self, pin: &str) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;

    /// Append a score entry and bump the player's cumulative total as one unit.
    fn record_score(
        &self,
        pin: &str,
        entry: ScoreEntryEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// List every score entry of a session in append order.
    fn score_entries(&self, pin: &str) -> BoxFuture<'static, StorageResult<Vec<ScoreEntryEntity>>>;

    /// Persist a durable final results record (no TTL).
    fn save_results(&self, results: FinalResultsEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Load the final results record for a PIN, if one was persisted.
    fn find_results(
        &self,
        pin: &str,
    ) -> BoxFuture<'static, StorageResult<Option<FinalResultsEntity>>>;

    /// Evict expired sessions, returning the PINs that were released.
    ///
    /// Backends whose database expires documents natively return an empty list.
    fn sweep_expired(&self) -> BoxFuture<'static, StorageResult<Vec<String>>>;
    /// Cheap liveness probe against the backend.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Attempt to re-establish the backend connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
