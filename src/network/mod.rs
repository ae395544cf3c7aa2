//! Network Layer
//!
//! Topics, the relay, timers and the session actors that drive `game/`.

pub mod protocol;
pub mod transport;
pub mod relay;
pub mod scheduler;
pub mod session;
pub mod generator;

pub use protocol::{EndpointId, Envelope, Frame};
pub use transport::{Endpoint, LocalBus, Publisher, Subscription, Transport};
pub use relay::{RelayConfig, RelayError, RelayServer, TransportError, WsTransport, JOIN_TIMEOUT};
pub use scheduler::{PhaseScheduler, SchedulerTick};
pub use session::{
    spawn_host, spawn_participant, HostHandle, LocalParticipant, ParticipantHandle, RoundView,
    SessionConfig, SessionError,
};
pub use generator::{parse_generated_question, GenerateError, QuestionBank, QuestionSource};
