//! `codepair-session`: one side of a code-based device pairing.
//!
//! A [`PairingSession`] publishes and polls key agreement messages on a
//! relay channel until both sides share a key, then moves one sealed
//! payload from the initiator to the joiner.

pub mod codec;
pub mod poller;
pub mod session;
pub mod settings;

pub use codec::{CodecError, Message, MessageKind, SecretCodec, ENVELOPE_VERSION};
pub use poller::PollScheduler;
pub use session::{Canceller, PairingSession, SessionHandle, SessionOutcome};
pub use settings::SessionSettings;
