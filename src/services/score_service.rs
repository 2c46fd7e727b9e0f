//! Rank-based scoring: provisional awards at answer time, reconciled to the
//! final arrival order when the round resolves.

use crate::{
    config::GameConfig,
    dto::ws::{AnswerOutcome, GameScoreEntry, RoundScoreEntry},
    state::session::{GameSession, RoundScore},
};

/// Points for one correct answer given its arrival rank and timing.
///
/// `rank` is zero-based. Ranks at or beyond the rewarded count earn nothing.
/// The time bonus scales the base score by the fraction of round time left at
/// answer time; the attempt penalty charges for wrong attempts before the
/// correct one. Both factors default to zero.
pub fn score_for_rank(
    rank: usize,
    response_time: u64,
    attempts: u32,
    config: &GameConfig,
) -> RoundScore {
    let base = config.base_score_for_rank(rank);
    if base == 0 {
        return RoundScore {
            rank: rank + 1,
            base: 0,
            time_bonus: 0,
            attempt_penalty: 0,
            total: 0,
        };
    }

    let round_time = config.round_time.as_millis() as u64;
    let remaining_fraction = if round_time == 0 {
        0.0
    } else {
        (1.0 - response_time as f64 / round_time as f64).clamp(0.0, 1.0)
    };
    let time_bonus = (base as f64 * config.time_bonus_factor * remaining_fraction).round() as u32;

    let wrong_attempts = attempts.saturating_sub(1);
    let attempt_penalty =
        (config.attempt_penalty_factor * wrong_attempts as f64).round() as u32;

    let total = (base + time_bonus).saturating_sub(attempt_penalty);
    RoundScore {
        rank: rank + 1,
        base,
        time_bonus,
        attempt_penalty,
        total,
    }
}

/// Resolve the round's scores from the final arrival order.
///
/// Replaces every provisional award with the definitive one, updates the
/// cumulative records and unflushed session scores, and returns the ranked
/// list for broadcast. Participants who disconnected before resolution are
/// skipped. Called only by the round lifecycle controller, under the session
/// lock.
pub fn resolve_round_scores(
    session: &mut GameSession,
    config: &GameConfig,
    now: u64,
) -> Vec<RoundScoreEntry> {
    let round_index = session.question_index;
    let arrival_order = session.round.arrival_order.clone();
    let mut entries = Vec::with_capacity(arrival_order.len());

    for (rank, participant_id) in arrival_order.iter().enumerate() {
        if !session.participants.contains_key(participant_id) {
            continue;
        }

        let key = (round_index, participant_id.clone());
        let response_time = session.round.response_times.get(&key).copied().unwrap_or(0);
        let attempts = session.round.attempts.get(&key).copied().unwrap_or(1);
        let estimated = session.round.estimated.get(&key).copied().unwrap_or(0);

        let breakdown = score_for_rank(rank, response_time, attempts, config);

        let old_score;
        let new_score;
        {
            let record = session.scores.entry(participant_id.clone()).or_default();
            record.total = record.total.saturating_sub(u64::from(estimated))
                + u64::from(breakdown.total);
            record.rounds.insert(round_index, breakdown);

            let Some(participant) = session.participants.get_mut(participant_id) else {
                continue;
            };
            participant.session_score = participant
                .session_score
                .saturating_sub(u64::from(estimated))
                + u64::from(breakdown.total);

            new_score = participant.base_score + record.total;
            old_score = new_score + u64::from(estimated) - u64::from(breakdown.total);

            record.history.push(AnswerOutcome {
                round_index,
                score: new_score,
                earned_points: breakdown.total,
                response_time,
                timestamp: now,
            });
        }

        entries.push(RoundScoreEntry {
            player_id: participant_id.clone(),
            player_name: session.participants[participant_id].name.clone(),
            rank: breakdown.rank,
            base_score: breakdown.base,
            time_bonus: breakdown.time_bonus,
            attempt_penalty: breakdown.attempt_penalty,
            earned_points: breakdown.total,
            response_time,
            attempt_count: attempts,
            old_score,
            new_score,
        });
    }

    entries
}

/// Cumulative leaderboard over every connected participant, best first.
pub fn game_scores(session: &GameSession) -> Vec<GameScoreEntry> {
    let mut entries: Vec<GameScoreEntry> = session
        .participants
        .values()
        .map(|participant| {
            let record = session.scores.get(&participant.id);
            let history = record.map(|r| r.history.clone()).unwrap_or_default();
            GameScoreEntry {
                player_id: participant.id.clone(),
                player_name: participant.name.clone(),
                total_score: session.displayed_score(participant),
                avg_response_time: average_response_time(&history),
                answer_history: history,
            }
        })
        .collect();

    entries.sort_by(|a, b| b.total_score.cmp(&a.total_score));
    entries
}

/// Mean response time over an answer history.
fn average_response_time(history: &[AnswerOutcome]) -> Option<u64> {
    if history.is_empty() {
        return None;
    }
    let sum: u64 = history.iter().map(|outcome| outcome.response_time).sum();
    Some(sum / history.len() as u64)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::dao::models::ResolvedIdentity;

    fn join(session: &mut GameSession, id: &str, base_score: u64) {
        session.resume(
            ResolvedIdentity {
                id: id.into(),
                name: id.to_uppercase(),
                fingerprint: None,
                is_permanent: true,
                total_score: base_score,
            },
            Uuid::new_v4(),
            3,
            0,
        );
    }

    fn mark_correct(session: &mut GameSession, id: &str, response_time: u64, estimated: u32) {
        let key = session.round_key(id);
        session.round.arrival_order.push(id.into());
        session.round.correct.insert(key.clone());
        session.round.response_times.insert(key.clone(), response_time);
        session.round.estimated.insert(key, estimated);
        session.scores.entry(id.into()).or_default().total += u64::from(estimated);
        session
            .participants
            .get_mut(id)
            .unwrap()
            .session_score += u64::from(estimated);
    }

    #[test]
    fn ranks_pay_out_in_table_order_and_zero_beyond_the_cap() {
        let config = GameConfig {
            max_score_players: 3,
            ..GameConfig::default()
        };
        let mut session = GameSession::new();
        for id in ["a", "b", "c", "d"] {
            join(&mut session, id, 0);
        }
        mark_correct(&mut session, "a", 1_000, 10);
        mark_correct(&mut session, "b", 2_000, 9);
        mark_correct(&mut session, "c", 3_000, 8);
        mark_correct(&mut session, "d", 4_000, 0);

        let entries = resolve_round_scores(&mut session, &config, 99);

        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].earned_points, 10);
        assert_eq!(entries[1].earned_points, 9);
        assert_eq!(entries[2].earned_points, 8);
        assert_eq!(entries[3].earned_points, 0);
        assert_eq!(entries[3].rank, 4);
        assert_eq!(session.scores["a"].total, 10);
        assert_eq!(session.scores["d"].total, 0);
    }

    #[test]
    fn reconciliation_corrects_a_wrong_provisional_award() {
        let config = GameConfig::default();
        let mut session = GameSession::new();
        join(&mut session, "a", 0);
        // Provisionally over-awarded 10 but finished at rank 2 (worth 9).
        session.round.arrival_order.push("b".into());
        join(&mut session, "b", 0);
        session.round.arrival_order.insert(0, "a".into());
        session.round.arrival_order.truncate(2);
        let key_a = session.round_key("a");
        let key_b = session.round_key("b");
        session.round.estimated.insert(key_a, 10);
        session.round.estimated.insert(key_b, 10);
        for id in ["a", "b"] {
            session.scores.entry(id.into()).or_default().total = 10;
            session.participants.get_mut(id).unwrap().session_score = 10;
        }

        let entries = resolve_round_scores(&mut session, &config, 0);

        assert_eq!(entries[0].earned_points, 10);
        assert_eq!(entries[1].earned_points, 9);
        assert_eq!(session.scores["b"].total, 9);
        assert_eq!(session.participants["b"].session_score, 9);
        assert_eq!(entries[1].old_score, 10);
        assert_eq!(entries[1].new_score, 9);
    }

    #[test]
    fn time_bonus_scales_with_remaining_fraction() {
        let config = GameConfig {
            time_bonus_factor: 1.0,
            ..GameConfig::default()
        };
        // Answer at half time with a 30s round: bonus = base * 0.5.
        let breakdown = score_for_rank(0, 15_000, 1, &config);
        assert_eq!(breakdown.base, 10);
        assert_eq!(breakdown.time_bonus, 5);
        assert_eq!(breakdown.total, 15);

        let late = score_for_rank(0, 60_000, 1, &config);
        assert_eq!(late.time_bonus, 0);
    }

    #[test]
    fn attempt_penalty_stays_disabled_by_default() {
        let config = GameConfig::default();
        let breakdown = score_for_rank(0, 0, 3, &config);
        assert_eq!(breakdown.attempt_penalty, 0);
        assert_eq!(breakdown.total, 10);
    }

    #[test]
    fn leaderboard_orders_by_displayed_total() {
        let mut session = GameSession::new();
        join(&mut session, "low", 5);
        join(&mut session, "high", 50);
        session.scores.entry("low".into()).or_default().total = 10;

        let board = game_scores(&session);
        assert_eq!(board[0].player_id, "high");
        assert_eq!(board[0].total_score, 50);
        assert_eq!(board[1].total_score, 15);
    }

    #[test]
    fn disconnected_participants_are_skipped_at_resolution() {
        let config = GameConfig::default();
        let mut session = GameSession::new();
        join(&mut session, "here", 0);
        mark_correct(&mut session, "here", 100, 10);
        session.round.arrival_order.insert(0, "gone".into());

        let entries = resolve_round_scores(&mut session, &config, 0);
        assert_eq!(entries.len(), 1);
        // "here" arrived second, so reconciliation downgrades 10 to 9.
        assert_eq!(entries[0].rank, 2);
        assert_eq!(entries[0].earned_points, 9);
    }
}
