//! Session lifecycle: per-request context, registry and wire protocol.

pub mod context;
pub mod messages;
pub mod registry;
pub mod request;
pub mod writer;

pub use context::{RunOutcome, Session};
pub use registry::SessionRegistry;
