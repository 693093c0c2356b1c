/// Connection bookkeeping for hosts and players.
pub mod registry;
/// Ephemeral per-question round state.
pub mod round;
/// Live session domain model.
pub mod session;
/// Phase transition authority.
pub mod state_machine;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use crate::{
    config::AppConfig, dao::session_store::SessionStore, error::ServiceError,
    services::engine::SessionCommand,
};

pub use self::registry::{ConnectionRegistry, ParticipantConnection};

/// Shared handle to the central application state.
pub type SharedState = Arc<AppState>;

/// Command-channel handle of one live session engine.
#[derive(Clone)]
pub struct EngineHandle {
    /// Internal id of the session the engine drives.
    pub session_id: Uuid,
    /// Serialized command stream consumed by the engine task.
    pub tx: mpsc::UnboundedSender<SessionCommand>,
}

/// Central application state storing connections, engines, and store handles.
pub struct AppState {
    config: AppConfig,
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    registry: ConnectionRegistry,
    engines: DashMap<String, EngineHandle>,
    resume_gate: Mutex<()>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Arc::new(Self {
            config,
            session_store: RwLock::new(None),
            registry: ConnectionRegistry::new(),
            engines: DashMap::new(),
            resume_gate: Mutex::new(()),
        })
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Obtain the session store or fail with the degraded-mode error.
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn install_session_store(&self, store: Arc<dyn SessionStore>) {
        let mut guard = self.session_store.write().await;
        *guard = Some(store);
    }

    /// Remove the current session store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        let mut guard = self.session_store.write().await;
        guard.take();
    }

    /// Whether the application currently runs without a storage backend.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.session_store.read().await;
        guard.is_none()
    }

    /// Registry of live WebSocket connections keyed by PIN.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Command-channel handle of the engine driving `pin`, if one is running.
    pub fn engine(&self, pin: &str) -> Option<EngineHandle> {
        self.engines.get(pin).map(|entry| entry.value().clone())
    }

    /// Register the engine handle for a freshly spawned session task.
    pub fn insert_engine(&self, pin: String, handle: EngineHandle) {
        self.engines.insert(pin, handle);
    }

    /// Drop the engine handle once its task has wound down.
    pub fn remove_engine(&self, pin: &str) {
        self.engines.remove(pin);
    }

    /// Gate serializing engine resurrection so a PIN never gets two engines.
    pub fn resume_gate(&self) -> &Mutex<()> {
        &self.resume_gate
    }

    /// PINs of every session with a live engine task.
    pub fn live_pins(&self) -> Vec<String> {
        self.engines
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}
