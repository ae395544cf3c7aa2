//! # Fastest Finger
//!
//! Round synchronization for a fastest-finger quiz: one host runs a timed
//! multiple-choice round while any number of students follow along and answer,
//! all over a shared best-effort broadcast topic.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      FASTEST FINGER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Primitives                               │
//! │  ├── clock.rs     - Wall clock anchored to tokio time        │
//! │  └── hash.rs      - Snapshot fingerprints                    │
//! │                                                              │
//! │  game/            - Round logic (synchronous, no I/O)        │
//! │  ├── question.rs  - Questions and grade groups               │
//! │  ├── state.rs     - Phase, submissions, snapshots            │
//! │  ├── collector.rs - First-wins submission collector          │
//! │  ├── leaderboard.rs - Fastest correct answers                │
//! │  ├── round.rs     - Host round state machine                 │
//! │  └── mirror.rs    - Participant state mirror                 │
//! │                                                              │
//! │  network/         - Async plumbing                           │
//! │  ├── protocol.rs  - Wire messages                            │
//! │  ├── transport.rs - Topic endpoints, in-process bus          │
//! │  ├── relay.rs     - WebSocket fan-out relay                  │
//! │  ├── scheduler.rs - Round timer                              │
//! │  ├── session.rs   - Host and participant actors              │
//! │  └── generator.rs - Question sources                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency Model
//!
//! The host is the only authority. It publishes the full round state after
//! every transition and every participant overwrites its mirror with it, so a
//! lost message is repaired by the next snapshot. Snapshots carry the host's
//! epoch and a sequence number; mirrors drop late snapshots from the same host.
//!
//! The `game/` layer never reads the clock: "now" is always an argument.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::clock::{Clock, MonotonicClock, SharedClock};
pub use game::question::{AnswerOption, GradeGroup, Question};
pub use game::round::{RoundConfig, RoundStateMachine, Transition};
pub use game::state::{RoundPhase, RoundResult, RoundSnapshot, Submission};
pub use network::session::{
    spawn_host, spawn_participant, HostHandle, ParticipantHandle, RoundView, SessionConfig,
    SessionError,
};
pub use network::transport::{LocalBus, Transport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Answer window in time units (seconds).
pub const ROUND_DURATION_SECS: u32 = 30;

/// Maximum leaderboard entries.
pub const MAX_LEADERBOARD_ENTRIES: usize = 30;

/// Default session topic.
pub const DEFAULT_TOPIC: &str = "fastest-finger-quiz";
