//! Per-session engine task: the single writer of all live session state.
//!
//! Every mutation of a session (joins, host commands, answer admission, the
//! question timer, heartbeat housekeeping) flows through one command channel
//! consumed by one task, so phase checks and answer admission are race-free
//! by construction. The question-close timer is not a callback: it is a
//! deadline the engine's own `select!` loop watches, which makes the
//! timer-versus-host-close race resolve by ordinary message ordering and
//! makes a stale timer for a past round impossible.

use std::time::{Duration, Instant, SystemTime};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant as TokioInstant, MissedTickBehavior, interval, sleep_until};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::ScoreEntryEntity,
    dto::{
        phase::PhaseSnapshot,
        validation::validate_display_name,
        ws::{
            ChoiceCount, LeaveReason, ParticipantRole, PlayerSnapshot, QuestionPayload,
            ResultEntry, ServerMessage,
        },
    },
    error::ServiceError,
    state::{
        EngineHandle, ParticipantConnection, SharedState,
        round::{QuestionRound, RecordedAnswer},
        session::{AnswerValue, LiveSession, Player},
        state_machine::{
            Applied, FinishReason, SessionEvent, SessionPhase, SessionStateMachine,
        },
    },
};

use super::{results, scoring};

/// Host-issued actions forwarded over the command channel.
#[derive(Debug, Clone)]
pub enum HostAction {
    /// Open question `index` and start its answer window.
    StartQuestion {
        /// Index of the question to open.
        index: usize,
    },
    /// Close the answer window of the open question early.
    CloseQuestion,
    /// Advance to the question after the current one.
    NextQuestion,
    /// End the game and publish the final leaderboard.
    EndGame,
    /// Remove a player from the session.
    KickPlayer {
        /// Display name of the player to remove.
        name: String,
    },
    /// Keepalive refreshing the host liveness window.
    Heartbeat,
}

/// Commands consumed by a session engine task.
pub enum SessionCommand {
    /// A connection claims the host role.
    ConnectHost {
        /// Token presented by the connection.
        token: Uuid,
        /// The connection to install on success.
        connection: ParticipantConnection,
        /// Admission verdict for the socket handler.
        respond_to: oneshot::Sender<Result<(), ServiceError>>,
    },
    /// A command from the live host connection.
    HostAction {
        /// Connection id of the sender, to drop stale senders.
        conn_id: Uuid,
        /// The action to apply.
        action: HostAction,
    },
    /// The host socket went away.
    HostDisconnected {
        /// Connection id of the closed socket.
        conn_id: Uuid,
    },
    /// A connection joins (or rejoins) as a player.
    Join {
        /// Requested display name.
        name: String,
        /// The connection to install on success.
        connection: ParticipantConnection,
        /// Admission verdict for the socket handler.
        respond_to: oneshot::Sender<Result<(), ServiceError>>,
    },
    /// A player submits an answer for the open question.
    Submit {
        /// Display name of the submitting player.
        name: String,
        /// The submitted value.
        answer: AnswerValue,
        /// Client-side timestamp, informational only.
        sent_at_ms: Option<u64>,
        /// Server-side arrival instant, used for admission and scoring.
        received_at: Instant,
    },
    /// A player socket went away.
    PlayerDisconnected {
        /// Display name of the player.
        name: String,
        /// Connection id of the closed socket.
        conn_id: Uuid,
    },
    /// The process is shutting down; flush results and stop.
    Shutdown,
}

/// Spawn the engine task for `session` and return its command handle.
pub fn spawn(
    state: SharedState,
    session: LiveSession,
    machine: SessionStateMachine,
) -> EngineHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = EngineHandle {
        session_id: session.id,
        tx,
    };

    tokio::spawn(async move {
        let pin = session.pin.clone();
        SessionEngine::new(state, session, machine, rx).run().await;
        info!(%pin, "session engine stopped");
    });

    handle
}

struct SessionEngine {
    state: SharedState,
    session: LiveSession,
    machine: SessionStateMachine,
    round: Option<QuestionRound>,
    host_conn_id: Option<Uuid>,
    last_host_seen: Instant,
    expire_at: Option<Instant>,
    rx: mpsc::UnboundedReceiver<SessionCommand>,
    stopped: bool,
}

async fn maybe_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(TokioInstant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

impl SessionEngine {
    fn new(
        state: SharedState,
        session: LiveSession,
        machine: SessionStateMachine,
        rx: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Self {
        // A session resumed already finished only lingers for the grace window.
        let expire_at = machine
            .phase()
            .is_finished()
            .then(|| Instant::now() + state.config().finished_grace);

        Self {
            state,
            session,
            machine,
            round: None,
            host_conn_id: None,
            last_host_seen: Instant::now(),
            expire_at,
            rx,
            stopped: false,
        }
    }

    async fn run(mut self) {
        let mut tick = interval(self.state.config().engine_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.stopped {
            let round_deadline = self.round.as_ref().map(QuestionRound::deadline);
            tokio::select! {
                maybe_command = self.rx.recv() => match maybe_command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = maybe_sleep(round_deadline) => self.close_question(false).await,
                _ = maybe_sleep(self.expire_at) => {
                    self.expire().await;
                    break;
                }
                _ = tick.tick() => self.handle_tick().await,
            }
        }

        self.state.registry().drop_session(&self.session.pin);
        self.state.remove_engine(&self.session.pin);
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::ConnectHost {
                token,
                connection,
                respond_to,
            } => {
                let verdict = self.connect_host(token, connection).await;
                let _ = respond_to.send(verdict);
            }
            SessionCommand::HostAction { conn_id, action } => {
                self.handle_host_action(conn_id, action).await;
            }
            SessionCommand::HostDisconnected { conn_id } => {
                if self.host_conn_id == Some(conn_id) {
                    self.state.registry().remove_host(&self.session.pin, conn_id);
                    self.host_conn_id = None;
                    info!(pin = %self.session.pin, "host disconnected");
                }
            }
            SessionCommand::Join {
                name,
                connection,
                respond_to,
            } => {
                let verdict = self.join(name, connection).await;
                let _ = respond_to.send(verdict);
            }
            SessionCommand::Submit {
                name,
                answer,
                sent_at_ms,
                received_at,
            } => {
                if let Err(err) = self.submit(&name, answer, sent_at_ms, received_at).await {
                    self.state
                        .registry()
                        .send_to_player(&self.session.pin, &name, &ServerMessage::error(&err));
                }
            }
            SessionCommand::PlayerDisconnected { name, conn_id } => {
                if self
                    .state
                    .registry()
                    .remove_player(&self.session.pin, &name, conn_id)
                {
                    if let Some(player) = self.session.players.get_mut(&name) {
                        player.connected = false;
                    }
                    self.state.registry().send_to_host(
                        &self.session.pin,
                        &ServerMessage::PlayerLeft {
                            name,
                            reason: LeaveReason::Disconnected,
                        },
                    );
                }
            }
            SessionCommand::Shutdown => {
                if !self.machine.phase().is_finished()
                    && let Ok(applied) =
                        self.machine.apply(SessionEvent::Abort(FinishReason::Shutdown))
                    && applied.changed()
                {
                    self.finalize(FinishReason::Shutdown).await;
                }
                self.stopped = true;
            }
        }
    }

    async fn connect_host(
        &mut self,
        token: Uuid,
        connection: ParticipantConnection,
    ) -> Result<(), ServiceError> {
        if token != self.session.host_token {
            return Err(ServiceError::Unauthorized("invalid host token".into()));
        }

        let incumbent_alive = self.state.registry().has_host(&self.session.pin)
            && self.last_host_seen.elapsed() <= self.state.config().host_idle_timeout;
        if incumbent_alive {
            return Err(ServiceError::HostAlreadyConnected);
        }

        if let Some(replaced) = self
            .state
            .registry()
            .install_host(&self.session.pin, connection.clone())
        {
            info!(pin = %self.session.pin, old = %replaced.id, "host takeover after missed heartbeats");
        }
        self.host_conn_id = Some(connection.id);
        self.last_host_seen = Instant::now();

        let question = self.open_question_payload_for_host();
        self.state.registry().send_to_host(
            &self.session.pin,
            &ServerMessage::Welcome {
                role: ParticipantRole::Host,
                pin: self.session.pin.clone(),
                title: self.session.title.clone(),
                phase: self.phase_snapshot(),
                name: None,
                score: None,
                players: Some(self.roster()),
                question,
            },
        );
        Ok(())
    }

    async fn handle_host_action(&mut self, conn_id: Uuid, action: HostAction) {
        if self.host_conn_id != Some(conn_id) {
            warn!(pin = %self.session.pin, %conn_id, "ignoring command from stale host connection");
            return;
        }
        self.last_host_seen = Instant::now();

        let outcome = match action {
            HostAction::StartQuestion { index } => self.start_question(index).await,
            HostAction::CloseQuestion => {
                self.close_question(true).await;
                Ok(())
            }
            HostAction::NextQuestion => self.next_question().await,
            HostAction::EndGame => self.end_game().await,
            HostAction::KickPlayer { name } => self.kick_player(&name).await,
            HostAction::Heartbeat => Ok(()),
        };

        if let Err(err) = outcome {
            self.state
                .registry()
                .send_to_host(&self.session.pin, &ServerMessage::error(&err));
        }
    }

    async fn start_question(&mut self, index: usize) -> Result<(), ServiceError> {
        let applied = self.machine.apply(SessionEvent::StartQuestion { index })?;
        if !applied.changed() {
            // Retransmitted start for the question that is already open: the
            // round keeps its start timestamp and collected answers.
            debug!(pin = %self.session.pin, index, "ignoring duplicate start-question");
            return Ok(());
        }

        self.open_round(index).await;
        Ok(())
    }

    async fn open_round(&mut self, index: usize) {
        let time_limit = self.session.questions[index].time_limit;
        self.round = Some(QuestionRound::open(index, time_limit));
        self.session.current_index = Some(index);

        self.persist_session().await;
        self.broadcast_phase().await;

        let total = self.session.questions.len();
        let question = &self.session.questions[index];
        let host_payload = QuestionPayload::for_host(question, index, total);
        let player_payload =
            QuestionPayload::for_player(question, index, total, self.session.answer_display);

        self.state.registry().send_to_host(
            &self.session.pin,
            &ServerMessage::Question {
                payload: host_payload,
            },
        );
        self.state.registry().broadcast_to_players(
            &self.session.pin,
            &ServerMessage::Question {
                payload: player_payload,
            },
        );

        info!(pin = %self.session.pin, index, "question opened");
    }

    /// Close the open question, triggered by the host (`from_host`) or the
    /// deadline. Whichever arrives first wins; the loser is a no-op.
    async fn close_question(&mut self, from_host: bool) {
        let applied = match self.machine.apply(SessionEvent::CloseQuestion) {
            Ok(applied) => applied,
            Err(invalid) => {
                if from_host {
                    let err: ServiceError = invalid.into();
                    self.state
                        .registry()
                        .send_to_host(&self.session.pin, &ServerMessage::error(&err));
                }
                return;
            }
        };
        if !applied.changed() {
            return;
        }

        let Some(round) = self.round.take() else {
            return;
        };
        let index = round.index();

        let entries: Vec<ResultEntry> = round
            .submissions()
            .map(|(name, answer)| ResultEntry {
                name: name.clone(),
                correct: answer.correct,
                points: answer.points,
                answer: (&answer.value).into(),
            })
            .collect();
        let distribution: Vec<ChoiceCount> = round
            .choice_distribution()
            .into_iter()
            .map(|(id, count)| ChoiceCount { id, count })
            .collect();

        self.persist_session().await;
        self.broadcast_phase().await;

        let message = ServerMessage::Results {
            index,
            entries,
            distribution,
        };
        self.state
            .registry()
            .send_to_host(&self.session.pin, &message);
        self.state
            .registry()
            .broadcast_to_players(&self.session.pin, &message);

        info!(pin = %self.session.pin, index, from_host, "question closed");
    }

    async fn next_question(&mut self) -> Result<(), ServiceError> {
        let applied = self.machine.apply(SessionEvent::NextQuestion)?;
        match applied {
            Applied::Changed(SessionPhase::QuestionOpen { index }) => {
                self.open_round(index).await;
                Ok(())
            }
            Applied::Changed(SessionPhase::Finished { reason }) => {
                self.finalize(reason).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn end_game(&mut self) -> Result<(), ServiceError> {
        let applied = self.machine.apply(SessionEvent::EndGame)?;
        if let Applied::Changed(SessionPhase::Finished { reason }) = applied {
            self.finalize(reason).await;
        }
        Ok(())
    }

    async fn kick_player(&mut self, name: &str) -> Result<(), ServiceError> {
        if self.session.players.shift_remove(name).is_none() {
            return Err(ServiceError::NotFound(format!("player `{name}` not found")));
        }

        if let Some(connection) = self.state.registry().evict_player(&self.session.pin, name) {
            crate::state::registry::send_json(&connection.tx, &ServerMessage::Kicked);
        }

        if let Ok(store) = self.state.require_session_store().await
            && let Err(err) = store.remove_player(&self.session.pin, name).await
        {
            warn!(pin = %self.session.pin, error = %err, "failed to remove kicked player from store");
        }

        self.state.registry().send_to_host(
            &self.session.pin,
            &ServerMessage::PlayerLeft {
                name: name.to_owned(),
                reason: LeaveReason::Kicked,
            },
        );
        info!(pin = %self.session.pin, player = %name, "player kicked");
        Ok(())
    }

    async fn join(
        &mut self,
        name: String,
        connection: ParticipantConnection,
    ) -> Result<(), ServiceError> {
        let name = name.trim().to_owned();
        validate_display_name(&name)
            .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;

        if self.machine.phase().is_finished() {
            return Err(ServiceError::NotFound(format!(
                "session `{}` has finished",
                self.session.pin
            )));
        }

        let rejoining = self.session.players.contains_key(&name);
        if rejoining {
            // Reconnection-by-name: the record survives a transient
            // disconnect, but a live connection keeps exclusive hold of it.
            if self.state.registry().has_player(&self.session.pin, &name) {
                return Err(ServiceError::NameTaken(name));
            }
        } else {
            if !matches!(self.machine.phase(), SessionPhase::Lobby) {
                return Err(ServiceError::IllegalTransition(
                    "new players can only join while the lobby is open".into(),
                ));
            }
            if self.session.players.len() >= self.state.config().max_players {
                return Err(ServiceError::InvalidInput("session is full".into()));
            }
        }

        self.state
            .registry()
            .install_player(&self.session.pin, &name, connection);

        let player = self
            .session
            .players
            .entry(name.clone())
            .or_insert_with(|| Player {
                name: name.clone(),
                score: 0,
                joined_at: SystemTime::now(),
                connected: true,
            });
        player.connected = true;
        let score = player.score;
        let player_entity = player.clone().into();

        if let Ok(store) = self.state.require_session_store().await
            && let Err(err) = store.upsert_player(&self.session.pin, player_entity).await
        {
            warn!(pin = %self.session.pin, error = %err, "failed to persist player");
        }

        let question = self.open_question_payload_for_player(&name);
        self.state.registry().send_to_player(
            &self.session.pin,
            &name,
            &ServerMessage::Welcome {
                role: ParticipantRole::Player,
                pin: self.session.pin.clone(),
                title: self.session.title.clone(),
                phase: self.phase_snapshot(),
                name: Some(name.clone()),
                score: Some(score),
                players: None,
                question,
            },
        );
        self.state.registry().send_to_host(
            &self.session.pin,
            &ServerMessage::PlayerJoined {
                name: name.clone(),
                players: self.session.players.len(),
            },
        );

        info!(pin = %self.session.pin, player = %name, rejoining, "player joined");
        Ok(())
    }

    async fn submit(
        &mut self,
        name: &str,
        answer: AnswerValue,
        sent_at_ms: Option<u64>,
        received_at: Instant,
    ) -> Result<(), ServiceError> {
        if !self.session.players.contains_key(name) {
            return Err(ServiceError::Unauthorized(
                "join the session before submitting answers".into(),
            ));
        }

        let SessionPhase::QuestionOpen { index } = self.machine.phase() else {
            return Err(ServiceError::RoundClosed);
        };
        let Some(round) = self.round.as_mut() else {
            return Err(ServiceError::RoundClosed);
        };
        debug_assert_eq!(round.index(), index);

        let question = &self.session.questions[index];
        if !question.accepts(&answer) {
            // Malformed for this question kind; does not consume the
            // player's single submission.
            return Err(ServiceError::InvalidInput(
                "answer does not match the question kind".into(),
            ));
        }

        let elapsed = round.admit(name, received_at)?;
        let correct = question.evaluate(&answer);
        let points = if question.scored() {
            scoring::score(correct, elapsed, question.time_limit)
        } else {
            0
        };

        round.record(
            name.to_owned(),
            RecordedAnswer {
                value: answer.clone(),
                elapsed,
                correct,
                points,
            },
        );
        let answer_count = round.answer_count();

        if let Some(player) = self.session.players.get_mut(name) {
            player.score += points;
        }

        debug!(
            pin = %self.session.pin,
            player = %name,
            index,
            correct,
            points,
            ?sent_at_ms,
            "answer accepted"
        );

        let entry = ScoreEntryEntity {
            player: name.to_owned(),
            question_index: index,
            answer: answer.into(),
            correct,
            points,
            latency_ms: elapsed.as_millis() as u64,
        };
        if let Ok(store) = self.state.require_session_store().await
            && let Err(err) = store.record_score(&self.session.pin, entry).await
        {
            warn!(pin = %self.session.pin, error = %err, "failed to persist score entry");
        }

        self.state.registry().send_to_player(
            &self.session.pin,
            name,
            &ServerMessage::AnswerAccepted { index },
        );
        self.state.registry().send_to_host(
            &self.session.pin,
            &ServerMessage::AnswerCount {
                index,
                count: answer_count,
            },
        );
        Ok(())
    }

    async fn handle_tick(&mut self) {
        if self.machine.phase().is_finished() {
            return;
        }

        if self.last_host_seen.elapsed() > self.state.config().host_idle_timeout {
            info!(pin = %self.session.pin, "host heartbeat timed out; tearing session down");
            if let Ok(applied) = self.machine.apply(SessionEvent::Abort(FinishReason::HostLost))
                && applied.changed()
            {
                self.round = None;
                self.finalize(FinishReason::HostLost).await;
            }
            return;
        }

        if let Ok(store) = self.state.require_session_store().await
            && let Err(err) = store
                .touch_session(&self.session.pin, self.state.config().session_ttl)
                .await
        {
            warn!(pin = %self.session.pin, error = %err, "failed to refresh session TTL");
        }
    }

    /// Publish the final leaderboard, flush the durable results record, and
    /// arm the grace timer that releases the PIN.
    async fn finalize(&mut self, reason: FinishReason) {
        self.round = None;

        let entries = match self.state.require_session_store().await {
            Ok(store) => match store.score_entries(&self.session.pin).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(pin = %self.session.pin, error = %err, "failed to load score entries for results");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        let final_results = results::build_final_results(&self.session, reason, entries);
        results::persist_final_results(&self.state, &final_results).await;

        self.persist_session().await;
        self.broadcast_phase().await;

        let leaderboard = ServerMessage::Leaderboard {
            standings: final_results
                .standings
                .iter()
                .map(|standing| crate::dto::ws::StandingPayload {
                    name: standing.name.clone(),
                    score: standing.score,
                    correct: standing.correct,
                    answered: standing.answered,
                })
                .collect(),
        };
        self.state
            .registry()
            .send_to_host(&self.session.pin, &leaderboard);
        self.state
            .registry()
            .broadcast_to_players(&self.session.pin, &leaderboard);

        self.expire_at = Some(Instant::now() + self.state.config().finished_grace);
        info!(pin = %self.session.pin, ?reason, "session finished");
    }

    /// Grace period elapsed: delete the stored session, which releases the PIN.
    async fn expire(&mut self) {
        if let Ok(store) = self.state.require_session_store().await
            && let Err(err) = super::pin_allocator::release(store.as_ref(), &self.session.pin).await
        {
            warn!(pin = %self.session.pin, error = %err, "failed to release expired session");
        }
        info!(pin = %self.session.pin, "session expired; PIN released");
    }

    async fn persist_session(&self) {
        let Ok(store) = self.state.require_session_store().await else {
            warn!(pin = %self.session.pin, "skipping session persist (degraded mode)");
            return;
        };
        let ttl = if self.machine.phase().is_finished() {
            self.state.config().finished_grace
        } else {
            self.state.config().session_ttl
        };
        let entity = self
            .session
            .to_entity(self.machine.phase().into(), SystemTime::now() + ttl);
        if let Err(err) = store.save_session(entity).await {
            warn!(pin = %self.session.pin, error = %err, "failed to persist session");
        }
    }

    async fn broadcast_phase(&self) {
        let message = ServerMessage::PhaseChanged {
            phase: self.phase_snapshot(),
        };
        self.state
            .registry()
            .send_to_host(&self.session.pin, &message);
        self.state
            .registry()
            .broadcast_to_players(&self.session.pin, &message);
    }

    fn phase_snapshot(&self) -> PhaseSnapshot {
        (&self.machine.phase()).into()
    }

    fn roster(&self) -> Vec<PlayerSnapshot> {
        self.session
            .players
            .values()
            .map(|player| PlayerSnapshot {
                name: player.name.clone(),
                score: player.score,
                connected: player.connected,
            })
            .collect()
    }

    fn open_question_payload_for_host(&self) -> Option<QuestionPayload> {
        let round = self.round.as_ref()?;
        let question = self.session.question(round.index())?;
        Some(QuestionPayload::for_host(
            question,
            round.index(),
            self.session.questions.len(),
        ))
    }

    fn open_question_payload_for_player(&self, name: &str) -> Option<QuestionPayload> {
        let round = self.round.as_ref()?;
        if round.answered(name) {
            return None;
        }
        let question = self.session.question(round.index())?;
        Some(QuestionPayload::for_player(
            question,
            round.index(),
            self.session.questions.len(),
            self.session.answer_display,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::dao::session_store::{SessionStore, memory::MemorySessionStore};
    use crate::state::AppState;
    use crate::state::session::{AnswerDisplay, Choice, Question, QuestionKind};
    use axum::extract::ws::Message;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    const PIN: &str = "913862";

    fn multiple_choice(limit: Duration) -> Question {
        Question {
            prompt: "Pick the correct one".into(),
            time_limit: limit,
            kind: QuestionKind::MultipleChoice {
                choices: vec![
                    Choice {
                        text: "correct".into(),
                        correct: true,
                    },
                    Choice {
                        text: "wrong".into(),
                        correct: false,
                    },
                ],
            },
        }
    }

    async fn setup(
        questions: Vec<Question>,
        config: AppConfig,
    ) -> (SharedState, EngineHandle, Uuid, Arc<MemorySessionStore>) {
        let state = AppState::new(config);
        let store = Arc::new(MemorySessionStore::new());
        state.install_session_store(store.clone()).await;

        let session = LiveSession::new(
            PIN.to_owned(),
            "Weekly quiz".into(),
            AnswerDisplay::OnDevice,
            questions,
        );
        let token = session.host_token;
        let machine = SessionStateMachine::new(session.questions.len());
        let handle = spawn(state.clone(), session, machine);
        state.insert_engine(PIN.to_owned(), handle.clone());

        (state, handle, token, store)
    }

    async fn connect_host(
        handle: &EngineHandle,
        token: Uuid,
    ) -> (Uuid, UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = ParticipantConnection::new(tx);
        let conn_id = connection.id;
        let (verdict_tx, verdict_rx) = oneshot::channel();
        handle
            .tx
            .send(SessionCommand::ConnectHost {
                token,
                connection,
                respond_to: verdict_tx,
            })
            .unwrap();
        verdict_rx.await.unwrap().unwrap();
        (conn_id, rx)
    }

    async fn try_join(
        handle: &EngineHandle,
        name: &str,
    ) -> (Result<(), ServiceError>, Uuid, UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = ParticipantConnection::new(tx);
        let conn_id = connection.id;
        let (verdict_tx, verdict_rx) = oneshot::channel();
        handle
            .tx
            .send(SessionCommand::Join {
                name: name.to_owned(),
                connection,
                respond_to: verdict_tx,
            })
            .unwrap();
        (verdict_rx.await.unwrap(), conn_id, rx)
    }

    async fn join(handle: &EngineHandle, name: &str) -> (Uuid, UnboundedReceiver<Message>) {
        let (verdict, conn_id, rx) = try_join(handle, name).await;
        verdict.unwrap();
        (conn_id, rx)
    }

    fn host_action(handle: &EngineHandle, conn_id: Uuid, action: HostAction) {
        handle
            .tx
            .send(SessionCommand::HostAction { conn_id, action })
            .unwrap();
    }

    fn submit_at(handle: &EngineHandle, name: &str, answer: AnswerValue, received_at: Instant) {
        handle
            .tx
            .send(SessionCommand::Submit {
                name: name.to_owned(),
                answer,
                sent_at_ms: None,
                received_at,
            })
            .unwrap();
    }

    /// Read messages until one with the given `type` tag arrives.
    async fn recv_until(rx: &mut UnboundedReceiver<Message>, kind: &str) -> Value {
        let deadline = Duration::from_secs(2);
        loop {
            let message = tokio::time::timeout(deadline, rx.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for `{kind}`"))
                .expect("channel closed while waiting");
            if let Message::Text(text) = message {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == kind {
                    return value;
                }
            }
        }
    }

    #[tokio::test]
    async fn correct_answer_ten_seconds_in_scores_917() {
        let (_state, handle, token, store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], AppConfig::default()).await;
        let (host_id, mut host_rx) = connect_host(&handle, token).await;
        let (_ada_id, mut ada_rx) = join(&handle, "Ada").await;

        host_action(&handle, host_id, HostAction::StartQuestion { index: 0 });
        recv_until(&mut ada_rx, "question").await;

        let opened_at = Instant::now();
        submit_at(
            &handle,
            "Ada",
            AnswerValue::Choice(0),
            opened_at + Duration::from_secs(10),
        );
        recv_until(&mut ada_rx, "answer_accepted").await;

        host_action(&handle, host_id, HostAction::CloseQuestion);
        let results = recv_until(&mut host_rx, "results").await;
        let entries = results["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["name"], "Ada");
        assert_eq!(entries[0]["correct"], true);
        assert_eq!(entries[0]["points"], 917);

        let players = store.players(PIN).await.unwrap();
        assert_eq!(players[0].score, 917);
    }

    #[tokio::test]
    async fn wrong_answer_scores_zero() {
        let (_state, handle, token, _store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], AppConfig::default()).await;
        let (host_id, mut host_rx) = connect_host(&handle, token).await;
        let (_bea_id, mut bea_rx) = join(&handle, "Bea").await;

        host_action(&handle, host_id, HostAction::StartQuestion { index: 0 });
        recv_until(&mut bea_rx, "question").await;

        submit_at(
            &handle,
            "Bea",
            AnswerValue::Choice(1),
            Instant::now() + Duration::from_secs(5),
        );
        recv_until(&mut bea_rx, "answer_accepted").await;

        host_action(&handle, host_id, HostAction::CloseQuestion);
        let results = recv_until(&mut host_rx, "results").await;
        let entries = results["entries"].as_array().unwrap();
        assert_eq!(entries[0]["correct"], false);
        assert_eq!(entries[0]["points"], 0);
    }

    #[tokio::test]
    async fn late_answer_is_rejected_without_a_score_entry() {
        let (_state, handle, token, store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], AppConfig::default()).await;
        let (host_id, _host_rx) = connect_host(&handle, token).await;
        let (_cy_id, mut cy_rx) = join(&handle, "Cy").await;

        host_action(&handle, host_id, HostAction::StartQuestion { index: 0 });
        recv_until(&mut cy_rx, "question").await;

        submit_at(
            &handle,
            "Cy",
            AnswerValue::Choice(0),
            Instant::now() + Duration::from_secs(61),
        );
        let error = recv_until(&mut cy_rx, "error").await;
        assert_eq!(error["code"], "round_closed");
        assert!(store.score_entries(PIN).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn host_close_beats_the_nominal_time_limit() {
        let (_state, handle, token, _store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], AppConfig::default()).await;
        let (host_id, _host_rx) = connect_host(&handle, token).await;
        let (_ada_id, mut ada_rx) = join(&handle, "Ada").await;

        host_action(&handle, host_id, HostAction::StartQuestion { index: 0 });
        recv_until(&mut ada_rx, "question").await;

        host_action(&handle, host_id, HostAction::CloseQuestion);
        recv_until(&mut ada_rx, "results").await;

        // Well within the 60s nominal window, but after the forced close.
        submit_at(
            &handle,
            "Ada",
            AnswerValue::Choice(0),
            Instant::now() + Duration::from_secs(4),
        );
        let error = recv_until(&mut ada_rx, "error").await;
        assert_eq!(error["code"], "round_closed");
    }

    #[tokio::test]
    async fn out_of_range_start_is_rejected_and_phase_unchanged() {
        let questions = vec![
            multiple_choice(Duration::from_secs(60)),
            multiple_choice(Duration::from_secs(60)),
            multiple_choice(Duration::from_secs(60)),
        ];
        let (_state, handle, token, _store) = setup(questions, AppConfig::default()).await;
        let (host_id, mut host_rx) = connect_host(&handle, token).await;

        host_action(&handle, host_id, HostAction::StartQuestion { index: 5 });
        let error = recv_until(&mut host_rx, "error").await;
        assert_eq!(error["code"], "illegal_transition");

        // Still in the lobby: a valid start goes through.
        host_action(&handle, host_id, HostAction::StartQuestion { index: 0 });
        let question = recv_until(&mut host_rx, "question").await;
        assert_eq!(question["index"], 0);
    }

    #[tokio::test]
    async fn simultaneous_name_claims_are_deterministic() {
        let (_state, handle, _token, _store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], AppConfig::default()).await;

        let (first, _first_id, _first_rx) = try_join(&handle, "Ada").await;
        first.unwrap();

        let (second, _second_id, _second_rx) = try_join(&handle, "Ada").await;
        assert!(matches!(second, Err(ServiceError::NameTaken(_))));
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected_not_overwritten() {
        let (_state, handle, token, store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], AppConfig::default()).await;
        let (host_id, _host_rx) = connect_host(&handle, token).await;
        let (_ada_id, mut ada_rx) = join(&handle, "Ada").await;

        host_action(&handle, host_id, HostAction::StartQuestion { index: 0 });
        recv_until(&mut ada_rx, "question").await;

        submit_at(&handle, "Ada", AnswerValue::Choice(1), Instant::now());
        recv_until(&mut ada_rx, "answer_accepted").await;

        submit_at(
            &handle,
            "Ada",
            AnswerValue::Choice(0),
            Instant::now() + Duration::from_secs(1),
        );
        let error = recv_until(&mut ada_rx, "error").await;
        assert_eq!(error["code"], "duplicate_submission");

        // The first (wrong) answer stands.
        let entries = store.score_entries(PIN).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].correct);
    }

    #[tokio::test]
    async fn restarting_the_open_question_keeps_collected_answers() {
        let (_state, handle, token, _store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], AppConfig::default()).await;
        let (host_id, mut host_rx) = connect_host(&handle, token).await;
        let (_ada_id, mut ada_rx) = join(&handle, "Ada").await;

        host_action(&handle, host_id, HostAction::StartQuestion { index: 0 });
        recv_until(&mut ada_rx, "question").await;

        submit_at(&handle, "Ada", AnswerValue::Choice(0), Instant::now());
        recv_until(&mut ada_rx, "answer_accepted").await;

        // Command retransmission: must not reset the round or drop answers.
        host_action(&handle, host_id, HostAction::StartQuestion { index: 0 });
        host_action(&handle, host_id, HostAction::CloseQuestion);

        let results = recv_until(&mut host_rx, "results").await;
        assert_eq!(results["entries"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejoining_player_keeps_score_and_open_submission_right() {
        let questions = vec![
            multiple_choice(Duration::from_secs(60)),
            multiple_choice(Duration::from_secs(60)),
        ];
        let (_state, handle, token, _store) = setup(questions, AppConfig::default()).await;
        let (host_id, mut host_rx) = connect_host(&handle, token).await;
        let (ada_id, mut ada_rx) = join(&handle, "Ada").await;

        host_action(&handle, host_id, HostAction::StartQuestion { index: 0 });
        recv_until(&mut ada_rx, "question").await;
        submit_at(&handle, "Ada", AnswerValue::Choice(0), Instant::now());
        recv_until(&mut ada_rx, "answer_accepted").await;

        host_action(&handle, host_id, HostAction::CloseQuestion);
        recv_until(&mut host_rx, "results").await;
        host_action(&handle, host_id, HostAction::NextQuestion);

        // Ada drops while question 1 is open, then rejoins under her name.
        handle
            .tx
            .send(SessionCommand::PlayerDisconnected {
                name: "Ada".into(),
                conn_id: ada_id,
            })
            .unwrap();
        let (_new_id, mut new_rx) = join(&handle, "Ada").await;

        let welcome = recv_until(&mut new_rx, "welcome").await;
        assert!(welcome["score"].as_i64().unwrap() >= 500);
        assert_eq!(welcome["question"]["index"], 1);

        // She had not answered question 1 yet, so one submission is allowed.
        submit_at(&handle, "Ada", AnswerValue::Choice(0), Instant::now());
        recv_until(&mut new_rx, "answer_accepted").await;
    }

    #[tokio::test]
    async fn deadline_closes_the_round_without_host_intervention() {
        let (_state, handle, token, _store) = setup(
            vec![multiple_choice(Duration::from_millis(100))],
            AppConfig::default(),
        )
        .await;
        let (host_id, mut host_rx) = connect_host(&handle, token).await;

        host_action(&handle, host_id, HostAction::StartQuestion { index: 0 });
        let results = recv_until(&mut host_rx, "results").await;
        assert_eq!(results["index"], 0);
    }

    #[tokio::test]
    async fn exhausting_questions_publishes_the_leaderboard() {
        let (_state, handle, token, store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], AppConfig::default()).await;
        let (host_id, mut host_rx) = connect_host(&handle, token).await;
        let (_ada_id, mut ada_rx) = join(&handle, "Ada").await;

        host_action(&handle, host_id, HostAction::StartQuestion { index: 0 });
        recv_until(&mut ada_rx, "question").await;
        submit_at(&handle, "Ada", AnswerValue::Choice(0), Instant::now());
        recv_until(&mut ada_rx, "answer_accepted").await;

        host_action(&handle, host_id, HostAction::CloseQuestion);
        host_action(&handle, host_id, HostAction::NextQuestion);

        let leaderboard = recv_until(&mut host_rx, "leaderboard").await;
        let standings = leaderboard["standings"].as_array().unwrap();
        assert_eq!(standings[0]["name"], "Ada");
        assert!(standings[0]["score"].as_i64().unwrap() > 900);

        let results = store.find_results(PIN).await.unwrap().unwrap();
        assert_eq!(results.standings.len(), 1);
    }

    #[tokio::test]
    async fn second_live_host_is_rejected() {
        let (_state, handle, token, _store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], AppConfig::default()).await;
        let (_host_id, _host_rx) = connect_host(&handle, token).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = ParticipantConnection::new(tx);
        let (verdict_tx, verdict_rx) = oneshot::channel();
        handle
            .tx
            .send(SessionCommand::ConnectHost {
                token,
                connection,
                respond_to: verdict_tx,
            })
            .unwrap();
        assert!(matches!(
            verdict_rx.await.unwrap(),
            Err(ServiceError::HostAlreadyConnected)
        ));
    }

    #[tokio::test]
    async fn host_takeover_is_permitted_after_missed_heartbeats() {
        let config = AppConfig {
            host_idle_timeout: Duration::from_millis(50),
            ..AppConfig::default()
        };
        let (_state, handle, token, _store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], config).await;
        let (stale_id, _stale_rx) = connect_host(&handle, token).await;

        // The incumbent goes silent past the heartbeat threshold.
        tokio::time::sleep(Duration::from_millis(80)).await;
        let (new_id, mut new_rx) = connect_host(&handle, token).await;

        // The replaced connection no longer drives the session.
        host_action(&handle, stale_id, HostAction::StartQuestion { index: 0 });
        host_action(&handle, new_id, HostAction::StartQuestion { index: 0 });
        let question = recv_until(&mut new_rx, "question").await;
        assert_eq!(question["index"], 0);
    }

    #[tokio::test]
    async fn shutdown_flushes_partial_results_to_the_sink() {
        let (_state, handle, token, store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], AppConfig::default()).await;
        let (host_id, _host_rx) = connect_host(&handle, token).await;
        let (_ada_id, mut ada_rx) = join(&handle, "Ada").await;

        host_action(&handle, host_id, HostAction::StartQuestion { index: 0 });
        recv_until(&mut ada_rx, "question").await;
        submit_at(&handle, "Ada", AnswerValue::Choice(0), Instant::now());
        recv_until(&mut ada_rx, "answer_accepted").await;

        handle.tx.send(SessionCommand::Shutdown).unwrap();
        let leaderboard = recv_until(&mut ada_rx, "leaderboard").await;
        assert_eq!(leaderboard["standings"][0]["name"], "Ada");

        let results = store.find_results(PIN).await.unwrap().unwrap();
        assert_eq!(
            results.reason,
            crate::dao::models::FinishReasonEntity::Shutdown
        );
    }

    #[tokio::test]
    async fn wrong_host_token_is_unauthorized() {
        let (_state, handle, _token, _store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], AppConfig::default()).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = ParticipantConnection::new(tx);
        let (verdict_tx, verdict_rx) = oneshot::channel();
        handle
            .tx
            .send(SessionCommand::ConnectHost {
                token: Uuid::new_v4(),
                connection,
                respond_to: verdict_tx,
            })
            .unwrap();
        assert!(matches!(
            verdict_rx.await.unwrap(),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn silent_host_tears_the_session_down_with_partial_results() {
        let config = AppConfig {
            host_idle_timeout: Duration::from_millis(100),
            engine_tick: Duration::from_millis(50),
            ..AppConfig::default()
        };
        let (_state, handle, token, store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], config).await;
        let (host_id, _host_rx) = connect_host(&handle, token).await;
        let (_ada_id, mut ada_rx) = join(&handle, "Ada").await;

        host_action(&handle, host_id, HostAction::StartQuestion { index: 0 });
        recv_until(&mut ada_rx, "question").await;
        submit_at(&handle, "Ada", AnswerValue::Choice(0), Instant::now());
        recv_until(&mut ada_rx, "answer_accepted").await;

        // No further host activity: the heartbeat window lapses.
        let leaderboard = recv_until(&mut ada_rx, "leaderboard").await;
        assert_eq!(leaderboard["standings"][0]["name"], "Ada");

        let results = store.find_results(PIN).await.unwrap().unwrap();
        assert_eq!(
            results.reason,
            crate::dao::models::FinishReasonEntity::HostLost
        );
    }

    #[tokio::test]
    async fn new_joins_are_lobby_only_while_rejoins_survive() {
        let (_state, handle, token, _store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], AppConfig::default()).await;
        let (host_id, _host_rx) = connect_host(&handle, token).await;
        let (_ada_id, mut ada_rx) = join(&handle, "Ada").await;

        host_action(&handle, host_id, HostAction::StartQuestion { index: 0 });
        recv_until(&mut ada_rx, "question").await;

        let (verdict, _, _rx) = try_join(&handle, "Late Larry").await;
        assert!(matches!(verdict, Err(ServiceError::IllegalTransition(_))));
    }

    #[tokio::test]
    async fn kicked_player_is_removed_and_notified() {
        let (_state, handle, token, store) =
            setup(vec![multiple_choice(Duration::from_secs(60))], AppConfig::default()).await;
        let (host_id, mut host_rx) = connect_host(&handle, token).await;
        let (_ada_id, mut ada_rx) = join(&handle, "Ada").await;

        host_action(
            &handle,
            host_id,
            HostAction::KickPlayer { name: "Ada".into() },
        );
        recv_until(&mut ada_rx, "kicked").await;
        let left = recv_until(&mut host_rx, "player_left").await;
        assert_eq!(left["reason"], "kicked");
        assert!(store.players(PIN).await.unwrap().is_empty());
    }
}
