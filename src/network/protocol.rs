//! Protocol Messages
//!
//! Wire format for the session topic. Every message is JSON, tagged by
//! `type`. Only the host is expected to send `sync_state` and
//! `broadcast_results`; nothing enforces that.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::state::{RoundResult, RoundSnapshot, Submission};

/// Identifier of one attached endpoint.
pub type EndpointId = Uuid;

// =============================================================================
// ENVELOPE
// =============================================================================

/// A message published on the session topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Full authoritative round state.
    SyncState {
        /// The snapshot.
        state: RoundSnapshot,
    },

    /// A participant's answer.
    SubmitAnswer {
        /// The submission.
        submission: Submission,
    },

    /// Final leaderboard (at most 30 entries).
    BroadcastResults {
        /// Ranked correct answers.
        results: Vec<RoundResult>,
    },
}

impl Envelope {
    /// Short variant name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::SyncState { .. } => "sync_state",
            Envelope::SubmitAnswer { .. } => "submit_answer",
            Envelope::BroadcastResults { .. } => "broadcast_results",
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// FRAME
// =============================================================================

/// An envelope stamped with the endpoint that published it, so endpoints can
/// skip their own messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Publishing endpoint.
    pub origin: EndpointId,
    /// Payload.
    pub message: Envelope,
}

impl Frame {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::question::tests::sample_question;
    use crate::game::question::GradeGroup;
    use crate::game::state::RoundPhase;
    use chrono::DateTime;

    #[test]
    fn test_sync_state_json_shape() {
        let msg = Envelope::SyncState {
            state: RoundSnapshot {
                phase: RoundPhase::Active,
                question: Some(sample_question(GradeGroup::Grades3To4)),
                start_time: DateTime::from_timestamp_millis(1_700_000_000_000),
                epoch: Uuid::nil(),
                seq: 9,
            },
        };

        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "sync_state");
        assert_eq!(value["state"]["phase"], "ACTIVE");
        assert_eq!(value["state"]["start_time"], 1_700_000_000_000i64);
        assert_eq!(value["state"]["question"]["grade_group"], "3-4");
        assert_eq!(value["state"]["seq"], 9);

        assert_eq!(Envelope::from_json(&msg.to_json().unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_setup_snapshot_has_null_fields() {
        let msg = Envelope::SyncState {
            state: RoundSnapshot {
                phase: RoundPhase::Setup,
                question: None,
                start_time: None,
                epoch: Uuid::nil(),
                seq: 1,
            },
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"question\":null"));
        assert!(json.contains("\"start_time\":null"));
    }

    #[test]
    fn test_results_message_parses() {
        let json = r#"{
            "type": "broadcast_results",
            "results": [
                {"participant_id": "Bob", "answer_id": "B", "timestamp": 1500, "is_correct": true}
            ]
        }"#;

        match Envelope::from_json(json).unwrap() {
            Envelope::BroadcastResults { results } => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].participant_id(), "Bob");
                assert_eq!(results[0].submission.timestamp.timestamp_millis(), 1_500);
            }
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(Envelope::from_json(r#"{"type":"shutdown"}"#).is_err());
    }

    #[test]
    fn test_frame_carries_origin() {
        let origin = Uuid::new_v4();
        let frame = Frame {
            origin,
            message: Envelope::SubmitAnswer {
                submission: Submission::new(
                    "Cara",
                    "D",
                    DateTime::from_timestamp_millis(42).unwrap(),
                ),
            },
        };
        let parsed = Frame::from_json(&frame.to_json().unwrap()).unwrap();
        assert_eq!(parsed.origin, origin);
        assert_eq!(parsed.message.kind(), "submit_answer");
    }
}
