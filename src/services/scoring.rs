//! Pure score computation for accepted answers.

use std::time::Duration;

/// Maximum points a single answer can award.
pub const MAX_POINTS: i64 = 1000;

/// Compute the points awarded for an answer.
///
/// Incorrect answers always score 0. A correct answer scores [`MAX_POINTS`]
/// when given instantly and decays linearly to half of that as the elapsed
/// time approaches the question's limit, so speed is rewarded without
/// punishing accuracy disproportionately. The curve is a policy detail kept
/// behind this function; callers only rely on the result being an integer in
/// `0..=MAX_POINTS` that never increases with elapsed time.
pub fn score(correct: bool, elapsed: Duration, time_limit: Duration) -> i64 {
    if !correct {
        return 0;
    }

    let fraction = if time_limit.is_zero() {
        1.0
    } else {
        elapsed.min(time_limit).as_secs_f64() / time_limit.as_secs_f64()
    };

    let points = (MAX_POINTS as f64 * (1.0 - 0.5 * fraction)).round() as i64;
    points.clamp(0, MAX_POINTS)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: Duration = Duration::from_secs(60);

    #[test]
    fn incorrect_answers_score_zero() {
        assert_eq!(score(false, Duration::ZERO, LIMIT), 0);
        assert_eq!(score(false, Duration::from_secs(5), LIMIT), 0);
        assert_eq!(score(false, Duration::from_secs(120), LIMIT), 0);
    }

    #[test]
    fn instant_correct_answer_scores_the_maximum() {
        assert_eq!(score(true, Duration::ZERO, LIMIT), MAX_POINTS);
        assert_eq!(score(true, Duration::ZERO, Duration::from_secs(1)), MAX_POINTS);
    }

    #[test]
    fn ten_seconds_into_a_minute_scores_917() {
        assert_eq!(score(true, Duration::from_secs(10), LIMIT), 917);
    }

    #[test]
    fn the_floor_is_half_the_maximum() {
        assert_eq!(score(true, LIMIT, LIMIT), MAX_POINTS / 2);
        // Elapsed past the limit is capped, not extrapolated below the floor.
        assert_eq!(score(true, Duration::from_secs(600), LIMIT), MAX_POINTS / 2);
    }

    #[test]
    fn score_is_non_increasing_in_elapsed_time() {
        let mut previous = MAX_POINTS;
        for seconds in 0..=60 {
            let current = score(true, Duration::from_secs(seconds), LIMIT);
            assert!(current <= previous, "score rose at {seconds}s");
            assert!((0..=MAX_POINTS).contains(&current));
            previous = current;
        }
    }

    #[test]
    fn zero_time_limit_degenerates_to_the_floor() {
        assert_eq!(score(true, Duration::ZERO, Duration::ZERO), MAX_POINTS / 2);
    }
}
