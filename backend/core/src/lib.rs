pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use error::{ErrorKind, PairingError, TransportError};
pub use event::{SessionEvent, SessionState};
pub use traits::{ChannelTransport, FailureReporter, SessionObserver};
pub use types::{ChannelBlob, ChannelId, ClientId, EntityTag, Fetched, KeyStrength, Role};
