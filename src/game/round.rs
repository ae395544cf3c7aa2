//! Round State Machine
//!
//! The host's authoritative round. Every operation is synchronous and returns
//! the effects the caller must carry out (publish, arm or disarm the timer),
//! in the order they must happen. Time is always passed in.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::game::collector::SubmissionCollector;
use crate::game::leaderboard::rank_with_limit;
use crate::game::question::Question;
use crate::game::state::{RoundPhase, RoundResult, RoundSnapshot, Submission};
use crate::{MAX_LEADERBOARD_ENTRIES, ROUND_DURATION_SECS};

// =============================================================================
// CONFIG
// =============================================================================

/// Round timing and ranking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundConfig {
    /// Answer window, in time units (seconds).
    pub round_duration_secs: u32,
    /// Leaderboard cap.
    pub max_results: usize,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            round_duration_secs: ROUND_DURATION_SECS,
            max_results: MAX_LEADERBOARD_ENTRIES,
        }
    }
}

impl RoundConfig {
    /// Answer window as a duration.
    pub fn round_duration(&self) -> Duration {
        Duration::seconds(i64::from(self.round_duration_secs))
    }
}

// =============================================================================
// COUNTDOWN
// =============================================================================

/// Whole time units left in the answer window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    remaining: u32,
    duration: u32,
}

impl Countdown {
    /// A full countdown.
    pub fn new(duration: u32) -> Self {
        Self {
            remaining: duration,
            duration,
        }
    }

    /// Countdown derived from time already elapsed since the round start:
    /// `floor(max(0, duration - elapsed))`.
    pub fn from_elapsed(duration: u32, elapsed: Duration) -> Self {
        let total_ms = i64::from(duration) * 1000;
        let left_ms = (total_ms - elapsed.num_milliseconds()).clamp(0, total_ms);
        Self {
            remaining: (left_ms / 1000) as u32,
            duration,
        }
    }

    /// Units left.
    #[inline]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Full length.
    #[inline]
    pub fn duration(&self) -> u32 {
        self.duration
    }

    /// Back to full length.
    pub fn reset(&mut self) {
        self.remaining = self.duration;
    }

    /// Consume one unit. Returns true once nothing is left.
    pub fn tick(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }
}

// =============================================================================
// EFFECTS
// =============================================================================

/// Something the owner of the machine must do after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Broadcast the full round state.
    PublishSnapshot(RoundSnapshot),
    /// Broadcast the final leaderboard.
    PublishResults(Vec<RoundResult>),
    /// Start the phase timer (cancelling any previous one first).
    ArmScheduler,
    /// Stop the phase timer and drop its pending ticks.
    DisarmScheduler,
}

/// Whether an operation changed the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The operation took effect.
    Applied,
    /// Not allowed in the current phase; nothing changed.
    Ignored,
}

/// Result of an operation on the machine.
#[derive(Debug)]
pub struct TransitionResult {
    /// Whether the round changed.
    pub transition: Transition,
    /// Effects to carry out, in order.
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    fn applied(effects: Vec<Effect>) -> Self {
        Self {
            transition: Transition::Applied,
            effects,
        }
    }

    fn ignored() -> Self {
        Self {
            transition: Transition::Ignored,
            effects: Vec::new(),
        }
    }

    /// Whether the operation took effect.
    #[inline]
    pub fn is_applied(&self) -> bool {
        self.transition == Transition::Applied
    }
}

// =============================================================================
// STATE MACHINE
// =============================================================================

/// Authoritative round state, owned by the host.
///
/// Created once per session and reset in place.
#[derive(Debug, Clone)]
pub struct RoundStateMachine {
    config: RoundConfig,
    phase: RoundPhase,
    question: Option<Question>,
    start_time: Option<DateTime<Utc>>,
    collector: SubmissionCollector,
    results: Vec<RoundResult>,
    countdown: Countdown,
    epoch: Uuid,
    seq: u64,
}

impl RoundStateMachine {
    /// Create a machine in `Setup` with a fresh epoch.
    pub fn new(config: RoundConfig) -> Self {
        Self::with_epoch(config, Uuid::new_v4())
    }

    /// Create a machine with an explicit epoch.
    pub fn with_epoch(config: RoundConfig, epoch: Uuid) -> Self {
        Self {
            config,
            phase: RoundPhase::Setup,
            question: None,
            start_time: None,
            collector: SubmissionCollector::new(),
            results: Vec::new(),
            countdown: Countdown::new(config.round_duration_secs),
            epoch,
            seq: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Round configuration.
    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    /// Current question.
    pub fn question(&self) -> Option<&Question> {
        self.question.as_ref()
    }

    /// Start of the current/last round.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// Accepted submissions, arrival order.
    pub fn submissions(&self) -> &[Submission] {
        self.collector.submissions()
    }

    /// Votes per answer id.
    pub fn vote_counts(&self) -> BTreeMap<String, usize> {
        self.collector.vote_counts()
    }

    /// Leaderboard of the last ended round.
    pub fn results(&self) -> &[RoundResult] {
        &self.results
    }

    /// Countdown shown while active.
    pub fn time_remaining(&self) -> u32 {
        self.countdown.remaining()
    }

    /// Host identity carried by snapshots.
    pub fn epoch(&self) -> Uuid {
        self.epoch
    }

    /// Sequence number of the last published snapshot.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Current state as a snapshot (without bumping the sequence).
    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            phase: self.phase,
            question: self.question.clone(),
            start_time: self.start_time,
            epoch: self.epoch,
            seq: self.seq,
        }
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// `Setup -> Ready`. In `Ready` the pending question is replaced.
    pub fn set_question(&mut self, question: Question) -> TransitionResult {
        if !matches!(self.phase, RoundPhase::Setup | RoundPhase::Ready) {
            return TransitionResult::ignored();
        }

        self.question = Some(question);
        self.phase = RoundPhase::Ready;
        TransitionResult::applied(vec![self.publish_snapshot()])
    }

    /// `Ready -> Active`, starting the answer window at `now`.
    pub fn start_game(&mut self, now: DateTime<Utc>) -> TransitionResult {
        if self.phase != RoundPhase::Ready || self.question.is_none() {
            return TransitionResult::ignored();
        }

        self.phase = RoundPhase::Active;
        self.start_time = Some(now);
        self.collector.clear();
        self.results.clear();
        self.countdown.reset();

        TransitionResult::applied(vec![self.publish_snapshot(), Effect::ArmScheduler])
    }

    /// `Active -> Ended`: rank and publish results.
    pub fn end_game(&mut self) -> TransitionResult {
        if self.phase != RoundPhase::Active {
            return TransitionResult::ignored();
        }

        self.phase = RoundPhase::Ended;
        self.results = match &self.question {
            Some(q) => rank_with_limit(q, self.collector.submissions(), self.config.max_results),
            None => Vec::new(),
        };

        TransitionResult::applied(vec![
            Effect::DisarmScheduler,
            Effect::PublishResults(self.results.clone()),
            self.publish_snapshot(),
        ])
    }

    /// `Ready | Ended -> Setup`, clearing the round.
    pub fn reset_game(&mut self) -> TransitionResult {
        if !self.phase.can_transition_to(RoundPhase::Setup) {
            return TransitionResult::ignored();
        }

        self.phase = RoundPhase::Setup;
        self.question = None;
        self.start_time = None;
        self.collector.clear();
        self.results.clear();
        self.countdown.reset();

        TransitionResult::applied(vec![Effect::DisarmScheduler, self.publish_snapshot()])
    }

    /// One scheduler tick. Ends the round when the countdown runs out.
    pub fn tick(&mut self) -> TransitionResult {
        if self.phase != RoundPhase::Active {
            return TransitionResult::ignored();
        }

        if self.countdown.tick() {
            return self.end_game();
        }

        TransitionResult::ignored()
    }

    /// Accept an inbound submission. Only while `Active`, first per
    /// participant wins.
    pub fn ingest_submission(&mut self, submission: Submission) -> bool {
        self.phase == RoundPhase::Active && self.collector.ingest(submission)
    }

    /// Re-announce the current state. While `Ended` the leaderboard goes
    /// out again ahead of the snapshot, so a late joiner gets both.
    pub fn resync(&mut self) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(2);
        if self.phase == RoundPhase::Ended {
            effects.push(Effect::PublishResults(self.results.clone()));
        }
        effects.push(self.publish_snapshot());
        effects
    }

    fn publish_snapshot(&mut self) -> Effect {
        self.seq += 1;
        Effect::PublishSnapshot(self.snapshot())
    }
}
