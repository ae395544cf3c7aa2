//! Leaderboard Ranking
//!
//! Fastest-finger ordering of correct submissions.

use crate::game::question::Question;
use crate::game::state::{RoundResult, Submission};
use crate::MAX_LEADERBOARD_ENTRIES;

/// Rank correct submissions, fastest first, keeping at most `limit`.
///
/// `submissions` must be in arrival order: equal timestamps keep that order
/// (`sort_by_key` is stable), so coarse clocks still reward whoever reached the
/// host first. An empty result means nobody answered correctly.
pub fn rank_with_limit(
    question: &Question,
    submissions: &[Submission],
    limit: usize,
) -> Vec<RoundResult> {
    let mut correct: Vec<&Submission> = submissions
        .iter()
        .filter(|s| question.is_correct(&s.answer_id))
        .collect();

    correct.sort_by_key(|s| s.timestamp);

    correct
        .into_iter()
        .take(limit)
        .cloned()
        .map(RoundResult::correct)
        .collect()
}

/// Rank with the standard cap of [`MAX_LEADERBOARD_ENTRIES`].
pub fn rank(question: &Question, submissions: &[Submission]) -> Vec<RoundResult> {
    rank_with_limit(question, submissions, MAX_LEADERBOARD_ENTRIES)
}

/// 1-based position of `participant_id` in `results`.
pub fn position_of(results: &[RoundResult], participant_id: &str) -> Option<usize> {
    results
        .iter()
        .position(|r| r.participant_id() == participant_id)
        .map(|i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::question::tests::sample_question;
    use crate::game::question::GradeGroup;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;
    use rand::seq::SliceRandom;
    use rand::Rng;

    fn at_ms(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn names(results: &[RoundResult]) -> Vec<&str> {
        results.iter().map(|r| r.participant_id()).collect()
    }

    #[test]
    fn test_ties_keep_arrival_order() {
        let q = sample_question(GradeGroup::Grades3To4);
        let start = 1_000_000;
        let subs = vec![
            Submission::new("Alice", "B", at_ms(start + 2_100)),
            Submission::new("Bob", "B", at_ms(start + 1_500)),
            Submission::new("Cara", "B", at_ms(start + 1_500)),
        ];

        let results = rank(&q, &subs);
        assert_eq!(names(&results), ["Bob", "Cara", "Alice"]);
        assert!(results.iter().all(|r| r.is_correct));
    }

    #[test]
    fn test_wrong_answers_filtered() {
        let q = sample_question(GradeGroup::Grades1To2);
        let subs = vec![
            Submission::new("Alice", "A", at_ms(10)),
            Submission::new("Bob", "B", at_ms(20)),
            Submission::new("Cara", "D", at_ms(5)),
        ];
        assert_eq!(names(&rank(&q, &subs)), ["Bob"]);
    }

    #[test]
    fn test_no_correct_answers_is_empty() {
        let q = sample_question(GradeGroup::Grades1To2);
        let subs = vec![Submission::new("Alice", "A", at_ms(10))];
        assert!(rank(&q, &subs).is_empty());
        assert!(rank(&q, &[]).is_empty());
    }

    #[test]
    fn test_capped_at_thirty_fastest() {
        let q = sample_question(GradeGroup::Grade9);
        let mut rng = rand::thread_rng();
        let mut subs: Vec<Submission> = (0..200)
            .map(|i| Submission::new(format!("p{i}"), "B", at_ms(rng.gen_range(0..30_000))))
            .collect();
        subs.shuffle(&mut rng);

        let results = rank(&q, &subs);
        assert_eq!(results.len(), MAX_LEADERBOARD_ENTRIES);

        let mut all: Vec<_> = subs.iter().map(|s| s.timestamp).collect();
        all.sort();
        assert_eq!(results.last().unwrap().submission.timestamp, all[MAX_LEADERBOARD_ENTRIES - 1]);
    }

    #[test]
    fn test_position_of() {
        let results = vec![
            RoundResult::correct(Submission::new("Bob", "B", at_ms(1))),
            RoundResult::correct(Submission::new("Cara", "B", at_ms(2))),
        ];
        assert_eq!(position_of(&results, "Cara"), Some(2));
        assert_eq!(position_of(&results, "Alice"), None);
    }

    proptest! {
        #[test]
        fn prop_sorted_correct_and_capped(
            entries in proptest::collection::vec((0u8..4, 0i64..30_000), 0..120)
        ) {
            let q = sample_question(GradeGroup::Grades5To6);
            let subs: Vec<Submission> = entries
                .iter()
                .enumerate()
                .map(|(i, (answer, ms))| {
                    let answer = ((b'A' + answer) as char).to_string();
                    Submission::new(format!("p{i}"), answer, at_ms(*ms))
                })
                .collect();

            let results = rank(&q, &subs);

            prop_assert!(results.len() <= MAX_LEADERBOARD_ENTRIES);
            prop_assert!(results.iter().all(|r| r.submission.answer_id == q.correct_answer_id));
            prop_assert!(results
                .windows(2)
                .all(|w| w[0].submission.timestamp <= w[1].submission.timestamp));

            let correct = subs.iter().filter(|s| q.is_correct(&s.answer_id)).count();
            prop_assert_eq!(results.len(), correct.min(MAX_LEADERBOARD_ENTRIES));
        }
    }
}
