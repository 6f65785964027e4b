//! Structured logging for codepair.
//!
//! Handles log redaction, console and rolling JSON file output, and logging
//! of pairing session events.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{EventLogEntry, PairingLogEvent, SessionEventLogger};
pub use logger::init_logger;
pub use redact::redact_sensitive_data;
