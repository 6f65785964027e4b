//! `codepair-relay`: where pairing messages travel.
//!
//! The relay is an untrusted blob store: one overwritable slot per channel,
//! versioned by an entity tag. [`MemoryRelay`] keeps it in process,
//! [`HttpRelay`] talks to a remote relay, and [`server`] exposes a
//! `MemoryRelay` over HTTP.

pub mod http;
pub mod memory;
pub mod reporter;
pub mod server;

pub use http::{HttpRelay, CLIENT_ID_HEADER};
pub use memory::{MemoryRelay, RelayOp};
pub use reporter::{HttpReporter, TracingReporter};
pub use server::{relay_router, serve};
