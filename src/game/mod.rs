//! Round Logic Module
//!
//! Everything that decides what the round looks like. Synchronous, no I/O;
//! callers pass the current time in.
//!
//! ## Module Structure
//!
//! - `question`: Questions, options, grade groups
//! - `state`: Phase, submissions, results, snapshots
//! - `collector`: First-wins submission collection
//! - `leaderboard`: Ranking of correct answers
//! - `round`: Host-owned round state machine
//! - `mirror`: Participant-side projection of the round

pub mod question;
pub mod state;
pub mod collector;
pub mod leaderboard;
pub mod round;
pub mod mirror;

// Re-export key types
pub use question::{AnswerOption, GradeGroup, Question, QuestionError};
pub use state::{RoundPhase, RoundResult, RoundSnapshot, Submission};
pub use collector::SubmissionCollector;
pub use leaderboard::{rank, rank_with_limit};
pub use round::{Countdown, Effect, RoundConfig, RoundStateMachine, Transition, TransitionResult};
pub use mirror::{MirrorUpdate, StateMirror};
