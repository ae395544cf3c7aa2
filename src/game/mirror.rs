//! State Mirror
//!
//! Best-effort local copy of the host's round, rebuilt from whatever
//! snapshots, results and submissions reach this participant. Also tracks the
//! local participant's identity and answer.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use crate::core::hash::{short_hex, Fingerprint};
use crate::game::collector::SubmissionCollector;
use crate::game::leaderboard::position_of;
use crate::game::question::Question;
use crate::game::round::{Countdown, RoundConfig};
use crate::game::state::{RoundPhase, RoundResult, RoundSnapshot, Submission};

/// Outcome of applying a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorUpdate {
    /// The local view changed.
    Applied,
    /// Same round content as the last applied snapshot (countdown refreshed).
    Unchanged,
    /// Older than a snapshot already applied from the same host; dropped.
    Stale,
}

/// Local projection of the round.
#[derive(Debug, Clone)]
pub struct StateMirror {
    config: RoundConfig,
    sequence_guard: bool,
    phase: RoundPhase,
    question: Option<Question>,
    start_time: Option<DateTime<Utc>>,
    countdown: Countdown,
    tally: SubmissionCollector,
    results: Vec<RoundResult>,
    local_name: Option<String>,
    has_submitted: bool,
    local_submission: Option<Submission>,
    last_applied: Option<(Uuid, u64)>,
    last_fingerprint: Option<Fingerprint>,
}

impl StateMirror {
    /// Create an empty mirror.
    ///
    /// With `sequence_guard` set, snapshots older than the last applied one
    /// from the same host epoch are dropped; otherwise the last snapshot
    /// received always wins.
    pub fn new(config: RoundConfig, sequence_guard: bool) -> Self {
        Self {
            config,
            sequence_guard,
            phase: RoundPhase::Setup,
            question: None,
            start_time: None,
            countdown: Countdown::new(config.round_duration_secs),
            tally: SubmissionCollector::new(),
            results: Vec::new(),
            local_name: None,
            has_submitted: false,
            local_submission: None,
            last_applied: None,
            last_fingerprint: None,
        }
    }

    // -------------------------------------------------------------------------
    // Inbound messages
    // -------------------------------------------------------------------------

    /// Apply a full-state snapshot received at `now`.
    pub fn apply_snapshot(&mut self, snapshot: RoundSnapshot, now: DateTime<Utc>) -> MirrorUpdate {
        if self.sequence_guard {
            if let Some((epoch, seq)) = self.last_applied {
                if snapshot.is_older_than(epoch, seq) {
                    debug!(seq = snapshot.seq, last = seq, "Dropping stale snapshot");
                    return MirrorUpdate::Stale;
                }
            }
        }

        let fingerprint = snapshot.fingerprint();
        let unchanged = self.last_fingerprint == Some(fingerprint);
        let new_round = snapshot.phase == RoundPhase::Active && snapshot.start_time != self.start_time;

        self.last_applied = Some((snapshot.epoch, snapshot.seq));
        self.last_fingerprint = Some(fingerprint);
        self.phase = snapshot.phase;
        self.question = snapshot.question;
        self.start_time = snapshot.start_time;

        match self.phase {
            RoundPhase::Active => {
                if new_round {
                    // Also covers missed SETUP/ENDED snapshots between rounds.
                    self.tally.clear();
                    self.results.clear();
                    self.has_submitted = false;
                    self.local_submission = None;
                }
                self.refresh_countdown(now);
            }
            RoundPhase::Ended => {
                self.countdown.reset();
                self.has_submitted = false;
            }
            // No round is running before ACTIVE, so whatever is left over
            // belongs to an earlier one, even if its SETUP snapshot was lost.
            RoundPhase::Setup | RoundPhase::Ready => {
                self.countdown.reset();
                self.has_submitted = false;
                self.local_submission = None;
                self.tally.clear();
                self.results.clear();
            }
        }

        if unchanged {
            MirrorUpdate::Unchanged
        } else {
            debug!(
                phase = %self.phase,
                fingerprint = %short_hex(&fingerprint),
                "Applied snapshot"
            );
            MirrorUpdate::Applied
        }
    }

    /// Apply the host's leaderboard. Forces the local phase to `Ended` in
    /// case the closing snapshot was lost.
    pub fn apply_results(&mut self, results: Vec<RoundResult>) {
        self.results = results;
        self.phase = RoundPhase::Ended;
    }

    /// Record another participant's submission in the live tally.
    ///
    /// Returns false if that participant is already counted.
    pub fn observe_submission(&mut self, submission: Submission) -> bool {
        self.tally.ingest(submission)
    }

    /// Recompute the display countdown from the round start.
    pub fn refresh_countdown(&mut self, now: DateTime<Utc>) {
        if self.phase != RoundPhase::Active {
            return;
        }
        if let Some(start) = self.start_time {
            self.countdown = Countdown::from_elapsed(self.config.round_duration_secs, now - start);
        }
    }

    // -------------------------------------------------------------------------
    // Local participant
    // -------------------------------------------------------------------------

    /// Set the local participant's display name. Blank names are refused.
    pub fn join(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.local_name = Some(name.to_string());
        true
    }

    /// Answer the current question.
    ///
    /// Returns the submission to publish, or `None` when not joined, already
    /// answered this round, or the round is not `Active`.
    pub fn submit(&mut self, answer_id: &str, now: DateTime<Utc>) -> Option<Submission> {
        if self.has_submitted || self.phase != RoundPhase::Active {
            return None;
        }
        let name = self.local_name.clone()?;

        let submission = Submission::new(name, answer_id, now);
        self.has_submitted = true;
        self.local_submission = Some(submission.clone());
        self.tally.ingest(submission.clone());
        Some(submission)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Best-known phase.
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Best-known question.
    pub fn question(&self) -> Option<&Question> {
        self.question.as_ref()
    }

    /// Best-known round start.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// Whole time units left, as of the last refresh.
    pub fn time_remaining(&self) -> u32 {
        self.countdown.remaining()
    }

    /// Submissions seen this round (live tally, not authoritative).
    pub fn submissions(&self) -> &[Submission] {
        self.tally.submissions()
    }

    /// Votes per answer id in the live tally.
    pub fn vote_counts(&self) -> BTreeMap<String, usize> {
        self.tally.vote_counts()
    }

    /// Last leaderboard received.
    pub fn results(&self) -> &[RoundResult] {
        &self.results
    }

    /// Local display name, once joined.
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Whether the local participant answered this round.
    pub fn has_submitted(&self) -> bool {
        self.has_submitted
    }

    /// The local participant's answer, kept until the next round starts.
    pub fn local_submission(&self) -> Option<&Submission> {
        self.local_submission.as_ref()
    }

    /// Whether the local answer matches the cached question's correct answer.
    ///
    /// Published results only list correct answers (and only the fastest 30),
    /// so a wrong answer can only be told apart from a slow correct one
    /// locally. `None` when there is no question or no local answer.
    pub fn did_answer_correctly(&self) -> Option<bool> {
        let question = self.question.as_ref()?;
        let submission = self.local_submission.as_ref()?;
        Some(question.is_correct(&submission.answer_id))
    }

    /// 1-based leaderboard position of the local participant.
    pub fn my_rank(&self) -> Option<usize> {
        let name = self.local_name.as_deref()?;
        position_of(&self.results, name)
    }
}
