use thiserror::Error;

/// High-level phases a live session can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Players can join; no question has been opened yet.
    Lobby,
    /// A question is open and the answer window is running.
    QuestionOpen {
        /// Index of the open question.
        index: usize,
    },
    /// The answer window is over; results for the question are computable.
    QuestionClosed {
        /// Index of the closed question.
        index: usize,
    },
    /// Terminal phase; the final leaderboard is available, nothing mutates anymore.
    Finished {
        /// Why the session ended.
        reason: FinishReason,
    },
}

impl SessionPhase {
    /// Index of the question the session is currently on, if any.
    pub fn question_index(&self) -> Option<usize> {
        match self {
            SessionPhase::QuestionOpen { index } | SessionPhase::QuestionClosed { index } => {
                Some(*index)
            }
            _ => None,
        }
    }

    /// Whether the session has reached its terminal phase.
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionPhase::Finished { .. })
    }
}

/// Indicates why a session reached the terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The last question was closed and no further index exists.
    QuestionsExhausted,
    /// The host ended the game explicitly.
    HostEnded,
    /// The host stayed silent past the heartbeat threshold.
    HostLost,
    /// The process is shutting down and flushed the session early.
    Shutdown,
}

/// Events that can be applied to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Host opens question `index`.
    StartQuestion {
        /// Index of the question to open.
        index: usize,
    },
    /// The answer window ends, either by timer or host command.
    CloseQuestion,
    /// Host advances to the question after the current one.
    NextQuestion,
    /// Host ends the game after a closed question.
    EndGame,
    /// Side exit: tear the session down from any non-terminal phase.
    Abort(FinishReason),
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: SessionPhase,
    /// The event that cannot be applied from this phase.
    pub event: SessionEvent,
}

/// Outcome of applying an event to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The phase changed to the contained value.
    Changed(SessionPhase),
    /// The event was a tolerated retransmission; the phase is untouched.
    Unchanged(SessionPhase),
}

impl Applied {
    /// The phase after the event, whether or not it changed.
    pub fn phase(&self) -> SessionPhase {
        match self {
            Applied::Changed(phase) | Applied::Unchanged(phase) => *phase,
        }
    }

    /// Whether the event actually moved the machine.
    pub fn changed(&self) -> bool {
        matches!(self, Applied::Changed(_))
    }
}

/// State machine owning the question-progression cycle of one session.
///
/// This is the sole authority on phase transitions; the per-session engine
/// task is its only caller, so applications are naturally serialized.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    phase: SessionPhase,
    question_count: usize,
    version: usize,
}

impl SessionStateMachine {
    /// Create a machine in the lobby for a session with `question_count` questions.
    pub fn new(question_count: usize) -> Self {
        Self {
            phase: SessionPhase::Lobby,
            question_count,
            version: 0,
        }
    }

    /// Rebuild a machine from a persisted phase, e.g. after a process restart.
    ///
    /// Round state is ephemeral, so a session persisted mid-question resumes
    /// with that question closed.
    pub fn resume(phase: SessionPhase, question_count: usize) -> Self {
        let phase = match phase {
            SessionPhase::QuestionOpen { index } => SessionPhase::QuestionClosed { index },
            other => other,
        };
        Self {
            phase,
            question_count,
            version: 0,
        }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Number of transitions applied so far.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Validate and apply an event, returning the resulting phase.
    ///
    /// Retransmitted events that are already satisfied (re-opening the question
    /// that is open, closing a question that is already closed) report
    /// [`Applied::Unchanged`] instead of an error so duplicate deliveries and
    /// the timer-versus-host close race degrade to no-ops.
    pub fn apply(&mut self, event: SessionEvent) -> Result<Applied, InvalidTransition> {
        let next = match (self.phase, event) {
            (SessionPhase::Lobby, SessionEvent::StartQuestion { index })
                if index < self.question_count =>
            {
                SessionPhase::QuestionOpen { index }
            }
            (SessionPhase::QuestionOpen { index }, SessionEvent::StartQuestion { index: again })
                if again == index =>
            {
                return Ok(Applied::Unchanged(self.phase));
            }
            (SessionPhase::QuestionOpen { index }, SessionEvent::CloseQuestion) => {
                SessionPhase::QuestionClosed { index }
            }
            (SessionPhase::QuestionClosed { .. }, SessionEvent::CloseQuestion) => {
                return Ok(Applied::Unchanged(self.phase));
            }
            (SessionPhase::QuestionClosed { index }, SessionEvent::NextQuestion) => {
                if index + 1 < self.question_count {
                    SessionPhase::QuestionOpen { index: index + 1 }
                } else {
                    SessionPhase::Finished {
                        reason: FinishReason::QuestionsExhausted,
                    }
                }
            }
            (SessionPhase::QuestionClosed { .. }, SessionEvent::EndGame) => SessionPhase::Finished {
                reason: FinishReason::HostEnded,
            },
            (SessionPhase::Finished { .. }, SessionEvent::Abort(_)) => {
                return Ok(Applied::Unchanged(self.phase));
            }
            (_, SessionEvent::Abort(reason)) => SessionPhase::Finished { reason },
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        self.phase = next;
        self.version += 1;
        Ok(Applied::Changed(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut SessionStateMachine, event: SessionEvent) -> SessionPhase {
        sm.apply(event).unwrap().phase()
    }

    #[test]
    fn initial_state_is_lobby() {
        let sm = SessionStateMachine::new(3);
        assert_eq!(sm.phase(), SessionPhase::Lobby);
    }

    #[test]
    fn full_happy_path_through_game() {
        let mut sm = SessionStateMachine::new(2);

        assert_eq!(
            apply(&mut sm, SessionEvent::StartQuestion { index: 0 }),
            SessionPhase::QuestionOpen { index: 0 }
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::CloseQuestion),
            SessionPhase::QuestionClosed { index: 0 }
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::NextQuestion),
            SessionPhase::QuestionOpen { index: 1 }
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::CloseQuestion),
            SessionPhase::QuestionClosed { index: 1 }
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::NextQuestion),
            SessionPhase::Finished {
                reason: FinishReason::QuestionsExhausted
            }
        );
    }

    #[test]
    fn end_game_from_closed_question() {
        let mut sm = SessionStateMachine::new(3);
        apply(&mut sm, SessionEvent::StartQuestion { index: 0 });
        apply(&mut sm, SessionEvent::CloseQuestion);
        assert_eq!(
            apply(&mut sm, SessionEvent::EndGame),
            SessionPhase::Finished {
                reason: FinishReason::HostEnded
            }
        );
    }

    #[test]
    fn reopening_open_question_is_a_tolerated_retransmission() {
        let mut sm = SessionStateMachine::new(3);
        apply(&mut sm, SessionEvent::StartQuestion { index: 1 });
        let version = sm.version();

        let outcome = sm.apply(SessionEvent::StartQuestion { index: 1 }).unwrap();
        assert!(!outcome.changed());
        assert_eq!(outcome.phase(), SessionPhase::QuestionOpen { index: 1 });
        assert_eq!(sm.version(), version);
    }

    #[test]
    fn double_close_is_a_no_op() {
        let mut sm = SessionStateMachine::new(1);
        apply(&mut sm, SessionEvent::StartQuestion { index: 0 });
        apply(&mut sm, SessionEvent::CloseQuestion);

        let outcome = sm.apply(SessionEvent::CloseQuestion).unwrap();
        assert!(!outcome.changed());
        assert_eq!(outcome.phase(), SessionPhase::QuestionClosed { index: 0 });
    }

    #[test]
    fn out_of_range_question_index_is_rejected() {
        let mut sm = SessionStateMachine::new(3);
        let err = sm
            .apply(SessionEvent::StartQuestion { index: 5 })
            .unwrap_err();
        assert_eq!(err.from, SessionPhase::Lobby);
        assert_eq!(err.event, SessionEvent::StartQuestion { index: 5 });
        assert_eq!(sm.phase(), SessionPhase::Lobby);
    }

    #[test]
    fn close_in_lobby_is_rejected() {
        let mut sm = SessionStateMachine::new(3);
        let err = sm.apply(SessionEvent::CloseQuestion).unwrap_err();
        assert_eq!(err.from, SessionPhase::Lobby);
    }

    #[test]
    fn abort_works_from_any_non_terminal_phase() {
        let mut sm = SessionStateMachine::new(3);
        apply(&mut sm, SessionEvent::StartQuestion { index: 0 });
        assert_eq!(
            apply(&mut sm, SessionEvent::Abort(FinishReason::HostLost)),
            SessionPhase::Finished {
                reason: FinishReason::HostLost
            }
        );

        // A second abort on a finished session stays put.
        let outcome = sm
            .apply(SessionEvent::Abort(FinishReason::Shutdown))
            .unwrap();
        assert!(!outcome.changed());
        assert_eq!(
            outcome.phase(),
            SessionPhase::Finished {
                reason: FinishReason::HostLost
            }
        );
    }

    #[test]
    fn finished_rejects_progression_events() {
        let mut sm = SessionStateMachine::new(1);
        apply(&mut sm, SessionEvent::StartQuestion { index: 0 });
        apply(&mut sm, SessionEvent::CloseQuestion);
        apply(&mut sm, SessionEvent::NextQuestion);

        assert!(sm.phase().is_finished());
        assert!(sm.apply(SessionEvent::StartQuestion { index: 0 }).is_err());
        assert!(sm.apply(SessionEvent::NextQuestion).is_err());
    }

    #[test]
    fn resume_closes_a_question_that_was_open() {
        let sm = SessionStateMachine::resume(SessionPhase::QuestionOpen { index: 2 }, 4);
        assert_eq!(sm.phase(), SessionPhase::QuestionClosed { index: 2 });

        let sm = SessionStateMachine::resume(SessionPhase::Lobby, 4);
        assert_eq!(sm.phase(), SessionPhase::Lobby);
    }
}
