//! Submission Collection
//!
//! First-wins de-duplication by participant, preserving arrival order.

use std::collections::{BTreeMap, BTreeSet};

use crate::game::state::Submission;

/// Accepted submissions for one round, in arrival order.
///
/// Used by the host as the canonical set and by every mirror as the live
/// tally.
#[derive(Clone, Debug, Default)]
pub struct SubmissionCollector {
    submissions: Vec<Submission>,
    seen: BTreeSet<String>,
}

impl SubmissionCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `submission` unless its participant already answered.
    ///
    /// Returns true when accepted.
    pub fn ingest(&mut self, submission: Submission) -> bool {
        if !self.seen.insert(submission.participant_id.clone()) {
            return false;
        }
        self.submissions.push(submission);
        true
    }

    /// Whether `participant_id` already has an accepted submission.
    pub fn contains(&self, participant_id: &str) -> bool {
        self.seen.contains(participant_id)
    }

    /// Accepted submissions, arrival order.
    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    /// Number of accepted submissions.
    pub fn len(&self) -> usize {
        self.submissions.len()
    }

    /// Whether nothing was accepted.
    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
    }

    /// Votes per answer id.
    pub fn vote_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for sub in &self.submissions {
            *counts.entry(sub.answer_id.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.submissions.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    fn at_ms(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_first_submission_wins() {
        let mut collector = SubmissionCollector::new();
        assert!(collector.ingest(Submission::new("Alice", "A", at_ms(100))));
        assert!(!collector.ingest(Submission::new("Alice", "B", at_ms(50))));

        assert_eq!(collector.len(), 1);
        assert_eq!(collector.submissions()[0].answer_id, "A");
    }

    #[test]
    fn test_arrival_order_preserved() {
        let mut collector = SubmissionCollector::new();
        collector.ingest(Submission::new("Cara", "A", at_ms(300)));
        collector.ingest(Submission::new("Alice", "A", at_ms(100)));
        collector.ingest(Submission::new("Bob", "A", at_ms(200)));

        let names: Vec<_> = collector
            .submissions()
            .iter()
            .map(|s| s.participant_id.as_str())
            .collect();
        assert_eq!(names, ["Cara", "Alice", "Bob"]);
    }

    #[test]
    fn test_vote_counts() {
        let mut collector = SubmissionCollector::new();
        collector.ingest(Submission::new("Alice", "A", at_ms(1)));
        collector.ingest(Submission::new("Bob", "C", at_ms(2)));
        collector.ingest(Submission::new("Cara", "A", at_ms(3)));

        let counts = collector.vote_counts();
        assert_eq!(counts.get("A"), Some(&2));
        assert_eq!(counts.get("C"), Some(&1));
        assert_eq!(counts.get("B"), None);
    }

    #[test]
    fn test_clear_allows_resubmission() {
        let mut collector = SubmissionCollector::new();
        collector.ingest(Submission::new("Alice", "A", at_ms(1)));
        collector.clear();

        assert!(collector.is_empty());
        assert!(!collector.contains("Alice"));
        assert!(collector.ingest(Submission::new("Alice", "B", at_ms(2))));
    }

    proptest! {
        #[test]
        fn prop_one_accepted_per_participant(
            entries in proptest::collection::vec((0u8..8, 0u8..4, 0i64..30_000), 0..64)
        ) {
            let mut collector = SubmissionCollector::new();
            let mut first: BTreeMap<String, String> = BTreeMap::new();

            for (who, answer, ms) in entries {
                let participant = format!("p{who}");
                let answer = ((b'A' + answer) as char).to_string();
                first.entry(participant.clone()).or_insert_with(|| answer.clone());
                collector.ingest(Submission::new(participant, answer, at_ms(ms)));
            }

            prop_assert_eq!(collector.len(), first.len());
            for sub in collector.submissions() {
                prop_assert_eq!(&first[&sub.participant_id], &sub.answer_id);
            }
        }
    }
}
