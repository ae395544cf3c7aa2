//! Core primitives shared by the game and network layers.

pub mod clock;
pub mod hash;

pub use clock::{Clock, MonotonicClock, SharedClock};
pub use hash::{short_hex, Fingerprint, StateHasher};
