//! Session Actors
//!
//! One tokio task per participant owns that participant's round state and
//! handles, one at a time, its three event sources: local commands, inbound
//! envelopes and timer ticks. Callers talk to the task through a handle and
//! observe it through a `watch` channel of [`RoundView`].
//!
//! The host task owns the [`RoundStateMachine`] and the [`PhaseScheduler`];
//! every other participant owns a [`StateMirror`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::clock::SharedClock;
use crate::game::mirror::{MirrorUpdate, StateMirror};
use crate::game::question::{GradeGroup, Question};
use crate::game::round::{Effect, RoundConfig, RoundStateMachine, Transition};
use crate::game::state::{RoundPhase, RoundResult, Submission};
use crate::network::generator::{GenerateError, QuestionSource};
use crate::network::protocol::Envelope;
use crate::network::scheduler::{PhaseScheduler, SchedulerTick};
use crate::network::transport::{short_id, Publisher, Subscription, Transport};
use crate::DEFAULT_TOPIC;

// =============================================================================
// CONFIG & ERRORS
// =============================================================================

/// Configuration shared by host and participant sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Topic name.
    pub topic: String,
    /// Round timing and ranking.
    pub round: RoundConfig,
    /// Length of one time unit.
    pub tick_interval: Duration,
    /// Drop snapshots older than the last applied one from the same host.
    pub sequence_guard: bool,
    /// Pending commands per handle before callers wait.
    pub command_buffer: usize,
    /// Host re-announces its state this often (`None` disables).
    pub resync_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            round: RoundConfig::default(),
            tick_interval: Duration::from_secs(1),
            sequence_guard: true,
            command_buffer: 64,
            resync_interval: Some(Duration::from_secs(5)),
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `QUIZ_TOPIC`, `QUIZ_ROUND_SECS`,
    /// `QUIZ_SEQUENCE_GUARD` and `QUIZ_RESYNC_SECS` (0 disables resync).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let round_duration_secs = std::env::var("QUIZ_ROUND_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(defaults.round.round_duration_secs);

        Self {
            topic: std::env::var("QUIZ_TOPIC").unwrap_or(defaults.topic),
            round: RoundConfig {
                round_duration_secs,
                ..defaults.round
            },
            sequence_guard: std::env::var("QUIZ_SEQUENCE_GUARD")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.sequence_guard),
            resync_interval: match std::env::var("QUIZ_RESYNC_SECS").ok().and_then(|v| v.parse::<u64>().ok()) {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.resync_interval,
            },
            ..defaults
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Session handle errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session task is gone.
    #[error("Session has stopped")]
    Closed,

    /// Question generation failed; the round is unchanged.
    #[error("Question generation failed: {0}")]
    Generate(#[from] GenerateError),
}

// =============================================================================
// OBSERVABLE STATE
// =============================================================================

/// The local participant, as seen by its own session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalParticipant {
    /// Display name (also the participant id).
    pub name: String,
    /// Answered the current round.
    pub has_submitted: bool,
    /// The answer given, kept until the next round starts.
    pub submission: Option<Submission>,
    /// Whether that answer was correct, when known.
    pub answered_correctly: Option<bool>,
    /// 1-based leaderboard position.
    pub rank: Option<usize>,
}

/// Read-only state for presentation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundView {
    /// Phase.
    pub phase: RoundPhase,
    /// Current question.
    pub question: Option<Question>,
    /// Round start.
    pub start_time: Option<DateTime<Utc>>,
    /// Whole time units left while active.
    pub time_remaining: u32,
    /// Submissions known this round.
    pub submissions: Vec<Submission>,
    /// Votes per answer id.
    pub vote_counts: BTreeMap<String, usize>,
    /// Leaderboard.
    pub results: Vec<RoundResult>,
    /// The local participant (participants only, once joined).
    pub local: Option<LocalParticipant>,
}

impl RoundView {
    fn of_machine(machine: &RoundStateMachine) -> Self {
        Self {
            phase: machine.phase(),
            question: machine.question().cloned(),
            start_time: machine.start_time(),
            time_remaining: machine.time_remaining(),
            submissions: machine.submissions().to_vec(),
            vote_counts: machine.vote_counts(),
            results: machine.results().to_vec(),
            local: None,
        }
    }

    fn of_mirror(mirror: &StateMirror) -> Self {
        Self {
            phase: mirror.phase(),
            question: mirror.question().cloned(),
            start_time: mirror.start_time(),
            time_remaining: mirror.time_remaining(),
            submissions: mirror.submissions().to_vec(),
            vote_counts: mirror.vote_counts(),
            results: mirror.results().to_vec(),
            local: mirror.local_name().map(|name| LocalParticipant {
                name: name.to_string(),
                has_submitted: mirror.has_submitted(),
                submission: mirror.local_submission().cloned(),
                answered_correctly: mirror.did_answer_correctly(),
                rank: mirror.my_rank(),
            }),
        }
    }
}

fn publish_view(tx: &watch::Sender<RoundView>, view: RoundView) {
    tx.send_if_modified(|current| {
        if *current == view {
            false
        } else {
            *current = view;
            true
        }
    });
}

fn periodic(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    timer
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

// =============================================================================
// HOST
// =============================================================================

enum HostCommand {
    SetQuestion {
        question: Question,
        reply: oneshot::Sender<Transition>,
    },
    StartGame {
        reply: oneshot::Sender<Transition>,
    },
    EndGame {
        reply: oneshot::Sender<Transition>,
    },
    ResetGame {
        reply: oneshot::Sender<Transition>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Host capability: the only way to drive the round.
#[derive(Debug, Clone)]
pub struct HostHandle {
    commands: mpsc::Sender<HostCommand>,
    view: watch::Receiver<RoundView>,
    epoch: Uuid,
}

impl std::fmt::Debug for HostCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HostCommand::SetQuestion { .. } => "SetQuestion",
            HostCommand::StartGame { .. } => "StartGame",
            HostCommand::EndGame { .. } => "EndGame",
            HostCommand::ResetGame { .. } => "ResetGame",
            HostCommand::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

impl HostHandle {
    /// Offer a question (`Setup`/`Ready` only).
    pub async fn set_question(&self, question: Question) -> Result<Transition, SessionError> {
        self.request(|reply| HostCommand::SetQuestion { question, reply }).await
    }

    /// Fetch a question from `source` and offer it.
    ///
    /// The source is awaited outside the session, so the round keeps running
    /// meanwhile; on failure the round is untouched.
    pub async fn generate_question<S: QuestionSource>(
        &self,
        source: &S,
        grade: GradeGroup,
    ) -> Result<Transition, SessionError> {
        let question = match source.generate(grade).await {
            Ok(q) => q,
            Err(e) => {
                warn!(%grade, "Question generation failed: {}", e);
                return Err(e.into());
            }
        };
        self.set_question(question).await
    }

    /// Open the answer window.
    pub async fn start_game(&self) -> Result<Transition, SessionError> {
        self.request(|reply| HostCommand::StartGame { reply }).await
    }

    /// Close the answer window early.
    pub async fn end_game(&self) -> Result<Transition, SessionError> {
        self.request(|reply| HostCommand::EndGame { reply }).await
    }

    /// Back to `Setup`.
    pub async fn reset_game(&self) -> Result<Transition, SessionError> {
        self.request(|reply| HostCommand::ResetGame { reply }).await
    }

    /// Current view.
    pub fn view(&self) -> RoundView {
        self.view.borrow().clone()
    }

    /// Watch the view.
    pub fn subscribe(&self) -> watch::Receiver<RoundView> {
        self.view.clone()
    }

    /// Host epoch carried by every snapshot.
    pub fn epoch(&self) -> Uuid {
        self.epoch
    }

    /// Stop the session, cancelling any live timer.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(HostCommand::Shutdown { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Transition>) -> HostCommand,
    ) -> Result<Transition, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// Start the host session on `transport`.
pub fn spawn_host<T: Transport + ?Sized>(
    config: &SessionConfig,
    transport: &T,
    clock: SharedClock,
) -> HostHandle {
    let machine = RoundStateMachine::new(config.round);
    let epoch = machine.epoch();
    let (publisher, subscription) = transport.attach().split();
    let (tick_tx, ticks) = mpsc::channel(config.round.round_duration_secs.max(1) as usize + 1);
    let (commands_tx, commands) = mpsc::channel(config.command_buffer.max(1));
    let (view_tx, view) = watch::channel(RoundView::of_machine(&machine));

    info!(
        topic = transport.topic(),
        endpoint = %short_id(&publisher.id()),
        epoch = %short_id(&epoch),
        "Host session started"
    );

    let actor = HostActor {
        machine,
        publisher,
        subscription,
        inbound_open: true,
        scheduler: PhaseScheduler::new(config.tick_interval, tick_tx),
        ticks,
        commands,
        view_tx,
        clock,
        resync: config.resync_interval.map(periodic),
    };
    tokio::spawn(actor.run());

    HostHandle {
        commands: commands_tx,
        view,
        epoch,
    }
}

struct HostActor {
    machine: RoundStateMachine,
    publisher: Publisher,
    subscription: Subscription,
    inbound_open: bool,
    scheduler: PhaseScheduler,
    ticks: mpsc::Receiver<SchedulerTick>,
    commands: mpsc::Receiver<HostCommand>,
    view_tx: watch::Sender<RoundView>,
    clock: SharedClock,
    resync: Option<Interval>,
}

impl HostActor {
    #[instrument(skip(self), fields(epoch = %short_id(&self.machine.epoch())))]
    async fn run(mut self) {
        // Late joiners learn the epoch from the first resync; early ones now.
        let initial = self.machine.resync();
        self.apply(initial);

        loop {
            tokio::select! {
                // Submissions already queued are ingested before any command
                // or tick can move the round out of ACTIVE.
                biased;

                envelope = self.subscription.recv(), if self.inbound_open => match envelope {
                    Some(envelope) => self.handle_envelope(envelope),
                    None => {
                        warn!("Transport closed, no more submissions will arrive");
                        self.inbound_open = false;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(HostCommand::Shutdown { reply }) => {
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(tick) = self.ticks.recv() => self.handle_tick(tick),
                _ = next_tick(&mut self.resync) => {
                    let effects = self.machine.resync();
                    self.apply(effects);
                }
            }

            publish_view(&self.view_tx, RoundView::of_machine(&self.machine));
        }

        self.scheduler.disarm();
        info!("Host session stopped");
    }

    fn handle_command(&mut self, command: HostCommand) {
        let (result, reply) = match command {
            HostCommand::SetQuestion { question, reply } => {
                debug!(grade = %question.grade_group, "Setting question");
                (self.machine.set_question(question), reply)
            }
            HostCommand::StartGame { reply } => (self.machine.start_game(self.clock.now()), reply),
            HostCommand::EndGame { reply } => (self.machine.end_game(), reply),
            HostCommand::ResetGame { reply } => (self.machine.reset_game(), reply),
            HostCommand::Shutdown { reply } => {
                let _ = reply.send(());
                return;
            }
        };

        if result.is_applied() {
            info!(phase = %self.machine.phase(), seq = self.machine.seq(), "Round transition");
        } else {
            debug!(phase = %self.machine.phase(), "Command ignored in current phase");
        }

        let transition = result.transition;
        self.apply(result.effects);
        let _ = reply.send(transition);
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::SubmitAnswer { submission } => {
                let participant = submission.participant_id.clone();
                if self.machine.ingest_submission(submission) {
                    debug!(%participant, total = self.machine.submissions().len(), "Submission accepted");
                } else {
                    debug!(%participant, phase = %self.machine.phase(), "Submission dropped");
                }
            }
            other => {
                warn!(kind = other.kind(), "Ignoring host message from another endpoint");
            }
        }
    }

    fn handle_tick(&mut self, tick: SchedulerTick) {
        if !self.scheduler.is_current(tick) {
            debug!(generation = tick.generation, "Discarding stale tick");
            return;
        }

        let result = self.machine.tick();
        if result.is_applied() {
            info!(
                correct = self.machine.results().len(),
                submissions = self.machine.submissions().len(),
                "Round timed out"
            );
        }
        self.apply(result.effects);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::PublishSnapshot(state) => {
                    debug!(phase = %state.phase, seq = state.seq, "Publishing snapshot");
                    self.publisher.publish(Envelope::SyncState { state });
                }
                Effect::PublishResults(results) => {
                    info!(entries = results.len(), "Publishing results");
                    self.publisher.publish(Envelope::BroadcastResults { results });
                }
                Effect::ArmScheduler => {
                    self.scheduler.arm(self.machine.config().round_duration_secs);
                }
                Effect::DisarmScheduler => self.scheduler.disarm(),
            }
        }
    }
}

// =============================================================================
// PARTICIPANT
// =============================================================================

enum ParticipantCommand {
    Join {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    Submit {
        answer_id: String,
        reply: oneshot::Sender<Option<Submission>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// A student's view of the round.
#[derive(Debug, Clone)]
pub struct ParticipantHandle {
    commands: mpsc::Sender<ParticipantCommand>,
    view: watch::Receiver<RoundView>,
}

impl std::fmt::Debug for ParticipantCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipantCommand::Join { name, .. } => write!(f, "Join({name:?})"),
            ParticipantCommand::Submit { answer_id, .. } => write!(f, "Submit({answer_id:?})"),
            ParticipantCommand::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

impl ParticipantHandle {
    /// Set the display name. Returns false for a blank name.
    pub async fn join_game(&self, name: impl Into<String>) -> Result<bool, SessionError> {
        let name = name.into();
        self.request(|reply| ParticipantCommand::Join { name, reply }).await
    }

    /// Answer the current question.
    ///
    /// `None` when not joined, already answered, or the round is not active
    /// as far as this participant knows.
    pub async fn submit_answer(
        &self,
        answer_id: impl Into<String>,
    ) -> Result<Option<Submission>, SessionError> {
        let answer_id = answer_id.into();
        self.request(|reply| ParticipantCommand::Submit { answer_id, reply }).await
    }

    /// Current view.
    pub fn view(&self) -> RoundView {
        self.view.borrow().clone()
    }

    /// Watch the view.
    pub fn subscribe(&self) -> watch::Receiver<RoundView> {
        self.view.clone()
    }

    /// Stop the session.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| ParticipantCommand::Shutdown { reply }).await
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> ParticipantCommand,
    ) -> Result<R, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// Start a participant session on `transport`.
pub fn spawn_participant<T: Transport + ?Sized>(
    config: &SessionConfig,
    transport: &T,
    clock: SharedClock,
) -> ParticipantHandle {
    let mirror = StateMirror::new(config.round, config.sequence_guard);
    let (publisher, subscription) = transport.attach().split();
    let (commands_tx, commands) = mpsc::channel(config.command_buffer.max(1));
    let (view_tx, view) = watch::channel(RoundView::of_mirror(&mirror));

    debug!(
        topic = transport.topic(),
        endpoint = %short_id(&publisher.id()),
        "Participant session started"
    );

    let actor = ParticipantActor {
        mirror,
        publisher,
        subscription,
        inbound_open: true,
        commands,
        view_tx,
        clock,
        countdown: periodic(config.tick_interval),
    };
    tokio::spawn(actor.run());

    ParticipantHandle {
        commands: commands_tx,
        view,
    }
}

struct ParticipantActor {
    mirror: StateMirror,
    publisher: Publisher,
    subscription: Subscription,
    inbound_open: bool,
    commands: mpsc::Receiver<ParticipantCommand>,
    view_tx: watch::Sender<RoundView>,
    clock: SharedClock,
    countdown: Interval,
}

impl ParticipantActor {
    #[instrument(skip(self), fields(endpoint = %short_id(&self.publisher.id())))]
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ParticipantCommand::Shutdown { reply }) => {
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                envelope = self.subscription.recv(), if self.inbound_open => match envelope {
                    Some(envelope) => self.handle_envelope(envelope),
                    None => {
                        warn!("Transport closed");
                        self.inbound_open = false;
                    }
                },
                _ = self.countdown.tick() => {
                    self.mirror.refresh_countdown(self.clock.now());
                }
            }

            publish_view(&self.view_tx, RoundView::of_mirror(&self.mirror));
        }

        debug!("Participant session stopped");
    }

    fn handle_command(&mut self, command: ParticipantCommand) {
        match command {
            ParticipantCommand::Join { name, reply } => {
                let joined = self.mirror.join(&name);
                if joined {
                    info!(name = name.trim(), "Joined game");
                }
                let _ = reply.send(joined);
            }
            ParticipantCommand::Submit { answer_id, reply } => {
                let submission = self.mirror.submit(&answer_id, self.clock.now());
                match &submission {
                    Some(s) => {
                        debug!(answer = %s.answer_id, "Submitting answer");
                        self.publisher.publish(Envelope::SubmitAnswer {
                            submission: s.clone(),
                        });
                    }
                    None => debug!(phase = %self.mirror.phase(), "Submit ignored"),
                }
                let _ = reply.send(submission);
            }
            ParticipantCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn handle_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::SyncState { state } => {
                if self.mirror.apply_snapshot(state, self.clock.now()) == MirrorUpdate::Stale {
                    debug!("Stale snapshot ignored");
                }
            }
            Envelope::BroadcastResults { results } => {
                debug!(entries = results.len(), "Results received");
                self.mirror.apply_results(results);
            }
            Envelope::SubmitAnswer { submission } => {
                self.mirror.observe_submission(submission);
            }
        }
    }
}
