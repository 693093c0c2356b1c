//! Session lifecycle operations: creation, lookup, and engine resurrection.

use std::time::SystemTime;

use indexmap::IndexMap;
use tracing::info;

use crate::{
    dao::models::PhaseEntity,
    dto::session::{
        CreateSessionRequest, FinalResultsResponse, PlayerStanding, SessionCreatedResponse,
        SessionSummary,
    },
    dto::{format_system_time, validation::validate_pin},
    error::ServiceError,
    state::{
        EngineHandle, SharedState,
        session::{LiveSession, Question},
        state_machine::{SessionPhase, SessionStateMachine},
    },
};

use super::{engine, pin_allocator};

/// Open a fresh live session and spawn its engine task.
///
/// The caller's host identity has already been verified by the route layer;
/// the returned response carries the per-session host token the WebSocket
/// connection must present.
pub async fn create_session(
    state: &SharedState,
    request: CreateSessionRequest,
) -> Result<SessionCreatedResponse, ServiceError> {
    let store = state.require_session_store().await?;

    let questions: Vec<Question> = request.questions.into_iter().map(Into::into).collect();
    let mut session = LiveSession::new(
        String::new(),
        request.title,
        request.answer_display.into(),
        questions,
    );

    let entity = session.to_entity(
        PhaseEntity::Lobby,
        SystemTime::now() + state.config().session_ttl,
    );
    let pin = pin_allocator::allocate(
        store.as_ref(),
        entity,
        state.config().pin_allocation_retries,
    )
    .await?;
    session.pin = pin.clone();

    let response = SessionCreatedResponse::from(&session);
    let machine = SessionStateMachine::new(session.questions.len());
    let handle = engine::spawn(state.clone(), session, machine);
    state.insert_engine(pin.clone(), handle);

    info!(%pin, "session created");
    Ok(response)
}

/// Public read-only projection of a session, served straight from the store.
pub async fn session_summary(
    state: &SharedState,
    pin: &str,
) -> Result<SessionSummary, ServiceError> {
    validate_pin(pin).map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    let store = state.require_session_store().await?;

    let Some(entity) = store.find_session(pin).await? else {
        return Err(ServiceError::NotFound(format!("session `{pin}` not found")));
    };
    let players = store.players(pin).await?;

    let phase: SessionPhase = entity.phase.into();
    Ok(SessionSummary {
        pin: entity.pin,
        title: entity.title,
        phase: (&phase).into(),
        question_count: entity.questions.len(),
        players: players
            .into_iter()
            .map(|player| PlayerStanding {
                name: player.name,
                score: player.score,
            })
            .collect(),
        created_at: format_system_time(entity.created_at),
    })
}

/// Durable final results for a (possibly already expired) PIN.
pub async fn final_results(
    state: &SharedState,
    pin: &str,
) -> Result<FinalResultsResponse, ServiceError> {
    validate_pin(pin).map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    let store = state.require_session_store().await?;

    let Some(results) = store.find_results(pin).await? else {
        return Err(ServiceError::NotFound(format!(
            "no results recorded for session `{pin}`"
        )));
    };
    Ok(results.into())
}

/// Obtain the engine handle for `pin`, resurrecting the engine from the
/// store when the session survived a process restart.
///
/// Round state is ephemeral, so a session persisted mid-question resumes
/// with that question closed. The resume gate serializes concurrent callers
/// so a PIN never ends up with two engines.
pub async fn ensure_engine(
    state: &SharedState,
    pin: &str,
) -> Result<EngineHandle, ServiceError> {
    if let Some(handle) = state.engine(pin) {
        return Ok(handle);
    }

    let _gate = state.resume_gate().lock().await;
    if let Some(handle) = state.engine(pin) {
        return Ok(handle);
    }

    let store = state.require_session_store().await?;
    let Some(entity) = store.find_session(pin).await? else {
        return Err(ServiceError::NotFound(format!("session `{pin}` not found")));
    };
    let players = store.players(pin).await?;

    let phase: SessionPhase = entity.phase.into();
    let machine = SessionStateMachine::resume(phase, entity.questions.len());
    let mut session: LiveSession = entity.into();
    session.players = players
        .into_iter()
        .map(|player| (player.name.clone(), player.into()))
        .collect::<IndexMap<_, _>>();

    info!(%pin, "resuming session engine from persisted state");
    let handle = engine::spawn(state.clone(), session, machine);
    state.insert_engine(pin.to_owned(), handle.clone());
    Ok(handle)
}

/// Ask every live engine to flush its session and stop.
///
/// Called on graceful shutdown so in-flight sessions reach the results sink
/// before the process exits.
pub fn shutdown_all(state: &SharedState) {
    for pin in state.live_pins() {
        if let Some(handle) = state.engine(&pin) {
            let _ = handle.tx.send(engine::SessionCommand::Shutdown);
        }
    }
}
