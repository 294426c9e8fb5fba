//! Cancellable generate/execute/refine sessions for unit-test generation.
//!
//! A client opens a streaming session for one focal method; a worker thread
//! asks a chat model for a test, compiles and runs it, feeds diagnostics
//! back, and streams the exchange log until the test passes, the round
//! budget runs out, or the client asks it to stop.
//!
//! - **[`core`]**: Pure, deterministic logic (cancellation, classification,
//!   target derivation). No I/O.
//! - **[`session`]**: Session state, registry and the wire protocol.
//! - **[`agents`]** and **[`io`]**: Capabilities with side effects (chat
//!   backend, build tool, configuration), behind traits so tests can script
//!   them.
//!
//! [`orchestrator`] runs the loop for one model, [`pipeline`] runs it for
//! every configured model, and [`dispatch`] owns the threads.

pub mod agents;
pub mod core;
pub mod dispatch;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
