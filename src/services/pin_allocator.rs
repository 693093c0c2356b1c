//! Allocation of unique, human-enterable session PINs.

use rand::Rng;
use tracing::{debug, warn};

use crate::{
    config::PIN_LENGTH,
    dao::{models::SessionEntity, session_store::SessionStore},
    error::ServiceError,
};

/// Reserve a free PIN for `session` by inserting it into the store.
///
/// Generation is random over the full fixed-width numeric space and retries a
/// bounded number of times on collision; the store's insert-if-absent is the
/// reservation, so two concurrent creations can never share a PIN. Running
/// out of retries means the active-session count is approaching the PIN
/// space, which is a capacity condition surfaced as
/// [`ServiceError::AllocationExhausted`], not a crash.
pub async fn allocate(
    store: &dyn SessionStore,
    mut session: SessionEntity,
    retries: u32,
) -> Result<String, ServiceError> {
    for attempt in 0..retries {
        let candidate = random_pin();
        session.pin = candidate.clone();

        if store.create_session(session.clone()).await? {
            debug!(pin = %candidate, attempt, "allocated session PIN");
            return Ok(candidate);
        }
    }

    warn!(retries, "PIN allocation ran out of retries");
    Err(ServiceError::AllocationExhausted)
}

/// Release a PIN by deleting the session that reserved it.
pub async fn release(store: &dyn SessionStore, pin: &str) -> Result<(), ServiceError> {
    store.delete_session(pin).await?;
    Ok(())
}

fn random_pin() -> String {
    let space = 10u64.pow(PIN_LENGTH);
    let value = rand::rng().random_range(0..space);
    format!("{value:0width$}", width = PIN_LENGTH as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{AnswerDisplayEntity, PhaseEntity};
    use crate::dao::session_store::memory::MemorySessionStore;
    use std::time::{Duration, SystemTime};
    use uuid::Uuid;

    fn session() -> SessionEntity {
        let now = SystemTime::now();
        SessionEntity {
            id: Uuid::new_v4(),
            pin: String::new(),
            title: "Quiz night".into(),
            host_token: Uuid::new_v4(),
            answer_display: AnswerDisplayEntity::OnDevice,
            questions: Vec::new(),
            current_index: None,
            phase: PhaseEntity::Lobby,
            created_at: now,
            expires_at: now + Duration::from_secs(60),
        }
    }

    #[test]
    fn pins_are_fixed_width_digits() {
        for _ in 0..64 {
            let pin = random_pin();
            assert_eq!(pin.len(), PIN_LENGTH as usize);
            assert!(pin.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn allocation_reserves_distinct_pins() {
        let store = MemorySessionStore::new();
        let first = allocate(&store, session(), 32).await.unwrap();
        let second = allocate(&store, session(), 32).await.unwrap();
        assert_ne!(first, second);
        assert!(store.find_session(&first).await.unwrap().is_some());
        assert!(store.find_session(&second).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn release_frees_the_pin() {
        let store = MemorySessionStore::new();
        let pin = allocate(&store, session(), 32).await.unwrap();
        release(&store, &pin).await.unwrap();
        assert!(store.find_session(&pin).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_a_capacity_error() {
        let store = MemorySessionStore::new();
        let err = allocate(&store, session(), 0).await.unwrap_err();
        assert!(matches!(err, ServiceError::AllocationExhausted));
    }
}
