use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{DateTime, doc},
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::IndexOptions,
};
use tokio::sync::RwLock;

use super::{
    connection::{MongoConfig, establish_connection},
    error::{MongoDaoError, MongoResult},
    models::{MongoPlayerDocument, MongoResultsDocument, MongoScoreDocument, MongoSessionDocument},
};
use crate::dao::{
    models::{FinalResultsEntity, PlayerEntity, ScoreEntryEntity, SessionEntity},
    session_store::SessionStore,
    storage::StorageResult,
};

const SESSION_COLLECTION_NAME: &str = "sessions";
const PLAYER_COLLECTION_NAME: &str = "players";
const SCORE_COLLECTION_NAME: &str = "scores";
const RESULTS_COLLECTION_NAME: &str = "results";

/// MongoDB-backed session store.
///
/// Live collections carry an `expires_at` TTL index so idle sessions are
/// evicted by the database itself; `sweep_expired` is therefore a no-op.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
    record_ttl: Duration,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref write_error)) if write_error.code == 11000
    )
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    ///
    /// `record_ttl` bounds the lifetime of player and score sub-records whose
    /// expiry is stamped at write time rather than refreshed on touch.
    pub async fn connect(config: MongoConfig, record_ttl: Duration) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
            record_ttl,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        for collection_name in [
            SESSION_COLLECTION_NAME,
            PLAYER_COLLECTION_NAME,
            SCORE_COLLECTION_NAME,
        ] {
            let collection = database.collection::<mongodb::bson::Document>(collection_name);
            let ttl_index = mongodb::IndexModel::builder()
                .keys(doc! {"expires_at": 1})
                .options(
                    IndexOptions::builder()
                        .name(Some(format!("{collection_name}_ttl_idx")))
                        .expire_after(Some(Duration::ZERO))
                        .build(),
                )
                .build();
            collection.create_index(ttl_index).await.map_err(|source| {
                MongoDaoError::EnsureIndex {
                    collection: collection_name,
                    index: "expires_at",
                    source,
                }
            })?;
        }

        let player_collection = database.collection::<MongoPlayerDocument>(PLAYER_COLLECTION_NAME);
        let player_index = mongodb::IndexModel::builder()
            .keys(doc! {"pin": 1, "name": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("player_session_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        player_collection
            .create_index(player_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: PLAYER_COLLECTION_NAME,
                index: "pin,name",
                source,
            })?;

        let score_collection = database.collection::<MongoScoreDocument>(SCORE_COLLECTION_NAME);
        let score_index = mongodb::IndexModel::builder()
            .keys(doc! {"pin": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("score_session_idx".to_owned()))
                    .build(),
            )
            .build();
        score_collection
            .create_index(score_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SCORE_COLLECTION_NAME,
                index: "pin",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.database()
            .await
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn players_collection(&self) -> Collection<MongoPlayerDocument> {
        self.database()
            .await
            .collection::<MongoPlayerDocument>(PLAYER_COLLECTION_NAME)
    }

    async fn scores_collection(&self) -> Collection<MongoScoreDocument> {
        self.database()
            .await
            .collection::<MongoScoreDocument>(SCORE_COLLECTION_NAME)
    }

    async fn results_collection(&self) -> Collection<MongoResultsDocument> {
        self.database()
            .await
            .collection::<MongoResultsDocument>(RESULTS_COLLECTION_NAME)
    }

    fn sub_record_expiry(&self) -> SystemTime {
        SystemTime::now() + self.inner.record_ttl
    }

    async fn create_session(&self, session: SessionEntity) -> MongoResult<bool> {
        let pin = session.pin.clone();
        let document: MongoSessionDocument = session.into();
        match self.sessions().await.insert_one(&document).await {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(source) => Err(MongoDaoError::WriteSession { pin, source }),
        }
    }

    async fn save_session(&self, session: SessionEntity) -> MongoResult<()> {
        let pin = session.pin.clone();
        let document: MongoSessionDocument = session.into();
        self.sessions()
            .await
            .replace_one(doc! {"_id": &pin}, &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::WriteSession { pin, source })?;
        Ok(())
    }

    async fn find_session(&self, pin: String) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(doc! {"_id": &pin})
            .await
            .map_err(|source| MongoDaoError::LoadSession { pin, source })?;
        Ok(document.map(Into::into))
    }

    async fn delete_session(&self, pin: String) -> MongoResult<bool> {
        let deleted = self
            .sessions()
            .await
            .delete_one(doc! {"_id": &pin})
            .await
            .map_err(|source| MongoDaoError::WriteSession {
                pin: pin.clone(),
                source,
            })?
            .deleted_count
            > 0;

        self.players_collection()
            .await
            .delete_many(doc! {"pin": &pin})
            .await
            .map_err(|source| MongoDaoError::WritePlayer {
                pin: pin.clone(),
                name: "*".into(),
                source,
            })?;
        self.scores_collection()
            .await
            .delete_many(doc! {"pin": &pin})
            .await
            .map_err(|source| MongoDaoError::RecordScore {
                pin: pin.clone(),
                source,
            })?;

        Ok(deleted)
    }

    async fn touch_session(&self, pin: String, ttl: Duration) -> MongoResult<()> {
        let expires_at = DateTime::from_system_time(SystemTime::now() + ttl);
        self.sessions()
            .await
            .update_one(
                doc! {"_id": &pin},
                doc! {"$set": {"expires_at": expires_at}},
            )
            .await
            .map_err(|source| MongoDaoError::WriteSession {
                pin: pin.clone(),
                source,
            })?;

        // Sub-records follow the session's lifetime.
        self.players_collection()
            .await
            .update_many(
                doc! {"pin": &pin},
                doc! {"$set": {"expires_at": expires_at}},
            )
            .await
            .map_err(|source| MongoDaoError::WritePlayer {
                pin: pin.clone(),
                name: "*".into(),
                source,
            })?;
        self.scores_collection()
            .await
            .update_many(
                doc! {"pin": &pin},
                doc! {"$set": {"expires_at": expires_at}},
            )
            .await
            .map_err(|source| MongoDaoError::RecordScore { pin, source })?;

        Ok(())
    }

    async fn upsert_player(&self, pin: String, player: PlayerEntity) -> MongoResult<()> {
        let name = player.name.clone();
        let document = MongoPlayerDocument::new(&pin, player, self.sub_record_expiry());
        self.players_collection()
            .await
            .replace_one(doc! {"pin": &pin, "name": &name}, &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::WritePlayer { pin, name, source })?;
        Ok(())
    }

    async fn remove_player(&self, pin: String, name: String) -> MongoResult<()> {
        self.players_collection()
            .await
            .delete_one(doc! {"pin": &pin, "name": &name})
            .await
            .map_err(|source| MongoDaoError::WritePlayer { pin, name, source })?;
        Ok(())
    }

    async fn players(&self, pin: String) -> MongoResult<Vec<PlayerEntity>> {
        let documents: Vec<MongoPlayerDocument> = self
            .players_collection()
            .await
            .find(doc! {"pin": &pin})
            .sort(doc! {"joined_at": 1})
            .await
            .map_err(|source| MongoDaoError::LoadPlayers {
                pin: pin.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadPlayers { pin, source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn record_score(&self, pin: String, entry: ScoreEntryEntity) -> MongoResult<()> {
        let player = entry.player.clone();
        let points = entry.points;
        let document = MongoScoreDocument::new(&pin, entry, self.sub_record_expiry());

        self.scores_collection()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::RecordScore {
                pin: pin.clone(),
                source,
            })?;

        // `$inc` keeps the cumulative total correct even under concurrent bumps.
        self.players_collection()
            .await
            .update_one(
                doc! {"pin": &pin, "name": &player},
                doc! {"$inc": {"score": points}},
            )
            .await
            .map_err(|source| MongoDaoError::WritePlayer {
                pin,
                name: player,
                source,
            })?;

        Ok(())
    }

    async fn score_entries(&self, pin: String) -> MongoResult<Vec<ScoreEntryEntity>> {
        let documents: Vec<MongoScoreDocument> = self
            .scores_collection()
            .await
            .find(doc! {"pin": &pin})
            .sort(doc! {"_id": 1})
            .await
            .map_err(|source| MongoDaoError::LoadScores {
                pin: pin.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadScores { pin, source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn save_results(&self, results: FinalResultsEntity) -> MongoResult<()> {
        let pin = results.pin.clone();
        let document: MongoResultsDocument = results.into();
        self.results_collection()
            .await
            .replace_one(doc! {"_id": &pin}, &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::WriteResults { pin, source })?;
        Ok(())
    }

    async fn find_results(&self, pin: String) -> MongoResult<Option<FinalResultsEntity>> {
        let document = self
            .results_collection()
            .await
            .find_one(doc! {"_id": &pin})
            .await
            .map_err(|source| MongoDaoError::LoadResults { pin, source })?;
        Ok(document.map(Into::into))
    }
}

impl SessionStore for MongoSessionStore {
    fn create_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.create_session(session).await.map_err(Into::into) })
    }

    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_session(session).await.map_err(Into::into) })
    }

    fn find_session(&self, pin: &str) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        let pin = pin.to_owned();
        Box::pin(async move { store.find_session(pin).await.map_err(Into::into) })
    }

    fn delete_session(&self, pin: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let pin = pin.to_owned();
        Box::pin(async move { store.delete_session(pin).await.map_err(Into::into) })
    }

    fn touch_session(&self, pin: &str, ttl: Duration) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let pin = pin.to_owned();
        Box::pin(async move { store.touch_session(pin, ttl).await.map_err(Into::into) })
    }

    fn upsert_player(
        &self,
        pin: &str,
        player: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let pin = pin.to_owned();
        Box::pin(async move { store.upsert_player(pin, player).await.map_err(Into::into) })
    }

    fn remove_player(&self, pin: &str, name: &str) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let pin = pin.to_owned();
        let name = name.to_owned();
        Box::pin(async move { store.remove_player(pin, name).await.map_err(Into::into) })
    }

    fn players(&self, pin: &str) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        let pin = pin.to_owned();
        Box::pin(async move { store.players(pin).await.map_err(Into::into) })
    }

    fn record_score(
        &self,
        pin: &str,
        entry: ScoreEntryEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let pin = pin.to_owned();
        Box::pin(async move { store.record_score(pin, entry).await.map_err(Into::into) })
    }

    fn score_entries(&self, pin: &str) -> BoxFuture<'static, StorageResult<Vec<ScoreEntryEntity>>> {
        let store = self.clone();
        let pin = pin.to_owned();
        Box::pin(async move { store.score_entries(pin).await.map_err(Into::into) })
    }

    fn save_results(&self, results: FinalResultsEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_results(results).await.map_err(Into::into) })
    }

    fn find_results(
        &self,
        pin: &str,
    ) -> BoxFuture<'static, StorageResult<Option<FinalResultsEntity>>> {
        let store = self.clone();
        let pin = pin.to_owned();
        Box::pin(async move { store.find_results(pin).await.map_err(Into::into) })
    }

    fn sweep_expired(&self) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        // The TTL index evicts expired documents server-side.
        Box::pin(async move { Ok(Vec::new()) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
