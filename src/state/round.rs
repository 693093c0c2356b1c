use std::time::{Duration, Instant};

use indexmap::IndexMap;
use thiserror::Error;

use crate::state::session::AnswerValue;

/// Why a submission was not admitted into the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The submission arrived outside the answer window.
    #[error("the answer window for this question is closed")]
    RoundClosed,
    /// The player already has an accepted answer for this round.
    #[error("an answer was already recorded for this question")]
    DuplicateSubmission,
}

/// An answer accepted into the round, already evaluated and scored.
#[derive(Debug, Clone)]
pub struct RecordedAnswer {
    /// The submitted value.
    pub value: AnswerValue,
    /// Server-side latency between round open and submission.
    pub elapsed: Duration,
    /// Whether the answer was correct.
    pub correct: bool,
    /// Points awarded.
    pub points: i64,
}

/// Ephemeral state of one open question.
///
/// Created when the engine opens a question and discarded when it closes;
/// accepted answers are persisted as score entries before the round is
/// dropped. First submission wins: later submissions from the same player
/// are rejected, never overwritten.
#[derive(Debug)]
pub struct QuestionRound {
    index: usize,
    started_at: Instant,
    time_limit: Duration,
    submissions: IndexMap<String, RecordedAnswer>,
}

impl QuestionRound {
    /// Open a round for question `index` starting now.
    pub fn open(index: usize, time_limit: Duration) -> Self {
        Self::open_at(index, time_limit, Instant::now())
    }

    /// Open a round with an explicit start instant.
    pub fn open_at(index: usize, time_limit: Duration, started_at: Instant) -> Self {
        Self {
            index,
            started_at,
            time_limit,
            submissions: IndexMap::new(),
        }
    }

    /// Index of the question this round belongs to.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Instant the round was opened.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Answer window length.
    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// Instant the answer window ends.
    pub fn deadline(&self) -> Instant {
        self.started_at + self.time_limit
    }

    /// Check whether a submission from `name` at `at` may be admitted.
    ///
    /// Admission requires the submission to fall within the answer window and
    /// the player to have no prior accepted answer this round. Returns the
    /// elapsed time since the round opened, which feeds the scoring curve.
    pub fn admit(&self, name: &str, at: Instant) -> Result<Duration, AdmissionError> {
        if at > self.deadline() {
            return Err(AdmissionError::RoundClosed);
        }
        if self.submissions.contains_key(name) {
            return Err(AdmissionError::DuplicateSubmission);
        }
        Ok(at.saturating_duration_since(self.started_at))
    }

    /// Record an admitted answer for `name`.
    pub fn record(&mut self, name: String, answer: RecordedAnswer) {
        self.submissions.insert(name, answer);
    }

    /// Whether `name` already has an accepted answer this round.
    pub fn answered(&self, name: &str) -> bool {
        self.submissions.contains_key(name)
    }

    /// Number of accepted answers so far.
    pub fn answer_count(&self) -> usize {
        self.submissions.len()
    }

    /// Accepted answers in arrival order.
    pub fn submissions(&self) -> impl Iterator<Item = (&String, &RecordedAnswer)> {
        self.submissions.iter()
    }

    /// How many accepted answers picked each choice id.
    pub fn choice_distribution(&self) -> IndexMap<u32, usize> {
        let mut counts = IndexMap::new();
        for answer in self.submissions.values() {
            if let AnswerValue::Choice(id) = answer.value {
                *counts.entry(id).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: Duration = Duration::from_secs(60);

    fn recorded(points: i64) -> RecordedAnswer {
        RecordedAnswer {
            value: AnswerValue::Choice(0),
            elapsed: Duration::from_secs(10),
            correct: points > 0,
            points,
        }
    }

    #[test]
    fn admits_within_the_window() {
        let round = QuestionRound::open(3, LIMIT);
        let elapsed = round
            .admit("Ada", round.started_at() + Duration::from_secs(10))
            .unwrap();
        assert_eq!(elapsed, Duration::from_secs(10));
    }

    #[test]
    fn rejects_after_the_deadline() {
        let round = QuestionRound::open(0, LIMIT);
        let err = round
            .admit("Cy", round.started_at() + Duration::from_secs(61))
            .unwrap_err();
        assert_eq!(err, AdmissionError::RoundClosed);
    }

    #[test]
    fn the_deadline_itself_is_still_inside_the_window() {
        let round = QuestionRound::open(0, LIMIT);
        assert!(round.admit("Ada", round.deadline()).is_ok());
    }

    #[test]
    fn first_submission_wins() {
        let mut round = QuestionRound::open(0, LIMIT);
        let at = round.started_at() + Duration::from_secs(5);

        round.admit("Ada", at).unwrap();
        round.record("Ada".into(), recorded(900));

        let err = round
            .admit("Ada", at + Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err, AdmissionError::DuplicateSubmission);
        assert_eq!(round.answer_count(), 1);
    }

    #[test]
    fn distribution_counts_choice_answers() {
        let mut round = QuestionRound::open(0, LIMIT);
        round.record(
            "Ada".into(),
            RecordedAnswer {
                value: AnswerValue::Choice(1),
                elapsed: Duration::from_secs(2),
                correct: true,
                points: 980,
            },
        );
        round.record(
            "Bea".into(),
            RecordedAnswer {
                value: AnswerValue::Choice(1),
                elapsed: Duration::from_secs(4),
                correct: true,
                points: 960,
            },
        );
        round.record(
            "Cy".into(),
            RecordedAnswer {
                value: AnswerValue::Choice(0),
                elapsed: Duration::from_secs(6),
                correct: false,
                points: 0,
            },
        );

        let counts = round.choice_distribution();
        assert_eq!(counts.get(&1), Some(&2));
        assert_eq!(counts.get(&0), Some(&1));
    }
}
