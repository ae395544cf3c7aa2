//! Round State Definitions
//!
//! Phase, submission, result and snapshot types shared by the host machine and
//! every mirror.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::hash::{Fingerprint, StateHasher};
use crate::game::question::Question;

// =============================================================================
// ROUND PHASE
// =============================================================================

/// Phase of the round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[derive(Default)]
pub enum RoundPhase {
    /// No question chosen yet.
    #[default]
    Setup,
    /// Question chosen, waiting for the host to start.
    Ready,
    /// Accepting answers.
    Active,
    /// Answers closed, results published.
    Ended,
}

impl RoundPhase {
    /// Whether the host machine may move from `self` to `next`.
    ///
    /// `Setup -> Ready -> Active -> Ended -> Setup`, plus `Ready -> Setup`.
    pub fn can_transition_to(self, next: RoundPhase) -> bool {
        matches!(
            (self, next),
            (RoundPhase::Setup, RoundPhase::Ready)
                | (RoundPhase::Ready, RoundPhase::Active)
                | (RoundPhase::Ready, RoundPhase::Setup)
                | (RoundPhase::Active, RoundPhase::Ended)
                | (RoundPhase::Ended, RoundPhase::Setup)
        )
    }

    /// Stable index, used when hashing.
    pub fn index(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RoundPhase::Setup => "SETUP",
            RoundPhase::Ready => "READY",
            RoundPhase::Active => "ACTIVE",
            RoundPhase::Ended => "ENDED",
        };
        f.write_str(label)
    }
}

// =============================================================================
// SUBMISSION
// =============================================================================

/// One participant's answer for the current round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Display name the participant joined with.
    pub participant_id: String,
    /// Chosen option id.
    pub answer_id: String,
    /// When the participant answered.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl Submission {
    /// Create a submission.
    pub fn new(
        participant_id: impl Into<String>,
        answer_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            answer_id: answer_id.into(),
            timestamp,
        }
    }

    /// Time from `start` to this submission (never negative).
    pub fn elapsed_since(&self, start: DateTime<Utc>) -> Duration {
        (self.timestamp - start).max(Duration::zero())
    }
}

/// A ranked correct submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    /// The accepted submission.
    #[serde(flatten)]
    pub submission: Submission,
    /// Always true for published results.
    pub is_correct: bool,
}

impl RoundResult {
    /// Wrap a correct submission.
    pub fn correct(submission: Submission) -> Self {
        Self {
            submission,
            is_correct: true,
        }
    }

    /// Participant this result belongs to.
    #[inline]
    pub fn participant_id(&self) -> &str {
        &self.submission.participant_id
    }

    /// Answer time relative to the round start.
    pub fn elapsed_since(&self, start: DateTime<Utc>) -> Duration {
        self.submission.elapsed_since(start)
    }
}

// =============================================================================
// ROUND SNAPSHOT
// =============================================================================

/// Full authoritative round state, re-sent whole on every change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Current phase.
    pub phase: RoundPhase,
    /// Current question (absent in `Setup`).
    pub question: Option<Question>,
    /// Round start instant (meaningful in `Active`/`Ended`).
    #[serde(with = "chrono::serde::ts_milliseconds_option", default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Identity of the host machine that produced this snapshot.
    pub epoch: Uuid,
    /// Per-epoch sequence number, bumped on every publish.
    pub seq: u64,
}

impl RoundSnapshot {
    /// Fingerprint of the round content, ignoring `epoch`/`seq`.
    ///
    /// Two snapshots with the same fingerprint describe the same round state.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = StateHasher::for_snapshot();
        hasher.update_u8(self.phase.index());
        match &self.question {
            Some(q) => {
                hasher.update_bool(true);
                hasher.update_str(&q.text);
                hasher.update_u64(q.options.len() as u64);
                for option in &q.options {
                    hasher.update_str(&option.id);
                    hasher.update_str(&option.text);
                }
                hasher.update_str(&q.correct_answer_id);
                hasher.update_u8(q.grade_group.index());
            }
            None => hasher.update_bool(false),
        }
        hasher.update_instant(self.start_time);
        hasher.finalize()
    }

    /// Whether this snapshot is older than one already applied.
    pub fn is_older_than(&self, epoch: Uuid, seq: u64) -> bool {
        self.epoch == epoch && self.seq < seq
    }
}
