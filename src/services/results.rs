//! Assembly and durable persistence of final session results.

use std::collections::BTreeMap;
use std::time::SystemTime;

use tracing::{info, warn};

use crate::{
    dao::models::{FinalResultsEntity, ScoreEntryEntity, StandingEntity},
    state::{SharedState, session::LiveSession, state_machine::FinishReason},
};

/// Assemble the durable results record for a finished session.
///
/// Standings take the union of the current roster and every name appearing in
/// the score entries, so players who left mid-game still show up in the
/// export with whatever they earned.
pub fn build_final_results(
    session: &LiveSession,
    reason: FinishReason,
    entries: Vec<ScoreEntryEntity>,
) -> FinalResultsEntity {
    let mut stats: BTreeMap<String, StandingEntity> = session
        .players
        .values()
        .map(|player| {
            (
                player.name.clone(),
                StandingEntity {
                    name: player.name.clone(),
                    score: player.score,
                    correct: 0,
                    answered: 0,
                },
            )
        })
        .collect();

    for entry in &entries {
        let standing = stats
            .entry(entry.player.clone())
            .or_insert_with(|| StandingEntity {
                name: entry.player.clone(),
                score: 0,
                correct: 0,
                answered: 0,
            });
        standing.answered += 1;
        if entry.correct {
            standing.correct += 1;
        }
        if !session.players.contains_key(&entry.player) {
            standing.score += entry.points;
        }
    }

    let mut standings: Vec<StandingEntity> = stats.into_values().collect();
    standings.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));

    FinalResultsEntity {
        pin: session.pin.clone(),
        session_id: session.id,
        title: session.title.clone(),
        reason: reason.into(),
        finished_at: SystemTime::now(),
        standings,
        entries,
    }
}

/// Hand the results record to the results persistence collaborator.
///
/// Failures are logged, never fatal: the live leaderboard was already derived
/// from the same data and the session teardown must not stall on storage.
pub async fn persist_final_results(state: &SharedState, results: &FinalResultsEntity) {
    match state.require_session_store().await {
        Ok(store) => {
            if let Err(err) = store.save_results(results.clone()).await {
                warn!(pin = %results.pin, error = %err, "failed to persist final results");
            } else {
                info!(
                    pin = %results.pin,
                    players = results.standings.len(),
                    "final results persisted"
                );
            }
        }
        Err(_) => {
            warn!(pin = %results.pin, "final results not persisted (degraded mode)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{AnswerValueEntity, FinishReasonEntity};
    use crate::state::session::{AnswerDisplay, LiveSession, Player};

    fn entry(player: &str, index: usize, correct: bool, points: i64) -> ScoreEntryEntity {
        ScoreEntryEntity {
            player: player.to_owned(),
            question_index: index,
            answer: AnswerValueEntity::Choice { id: 0 },
            correct,
            points,
            latency_ms: 1000,
        }
    }

    fn session_with_players(players: &[(&str, i64)]) -> LiveSession {
        let mut session = LiveSession::new(
            "913862".into(),
            "Weekly quiz".into(),
            AnswerDisplay::OnDevice,
            Vec::new(),
        );
        for (name, score) in players {
            session.players.insert(
                (*name).to_owned(),
                Player {
                    name: (*name).to_owned(),
                    score: *score,
                    joined_at: SystemTime::now(),
                    connected: true,
                },
            );
        }
        session
    }

    #[test]
    fn standings_are_sorted_by_score_then_name() {
        let session = session_with_players(&[("Ada", 917), ("Bea", 1500), ("Cy", 917)]);
        let results = build_final_results(&session, FinishReason::HostEnded, Vec::new());

        let names: Vec<&str> = results
            .standings
            .iter()
            .map(|standing| standing.name.as_str())
            .collect();
        assert_eq!(names, vec!["Bea", "Ada", "Cy"]);
        assert_eq!(results.reason, FinishReasonEntity::HostEnded);
    }

    #[test]
    fn correctness_counts_come_from_the_entries() {
        let session = session_with_players(&[("Ada", 1834)]);
        let entries = vec![
            entry("Ada", 0, true, 917),
            entry("Ada", 1, true, 917),
            entry("Ada", 2, false, 0),
        ];
        let results = build_final_results(&session, FinishReason::QuestionsExhausted, entries);

        let ada = &results.standings[0];
        assert_eq!(ada.answered, 3);
        assert_eq!(ada.correct, 2);
        assert_eq!(ada.score, 1834);
    }

    #[test]
    fn departed_players_are_reconstructed_from_entries() {
        let session = session_with_players(&[("Ada", 500)]);
        let entries = vec![entry("Ghost", 0, true, 750)];
        let results = build_final_results(&session, FinishReason::HostLost, entries);

        let ghost = results
            .standings
            .iter()
            .find(|standing| standing.name == "Ghost")
            .unwrap();
        assert_eq!(ghost.score, 750);
        assert_eq!(ghost.answered, 1);
    }
}
