//! Transport-independent session dispatch.
//!
//! The [`Dispatcher`] turns a validated open request into a registered
//! [`Session`] running on its own thread, routes stop requests through the
//! registry, and owns the process-wide JUnit version. The HTTP layer only
//! parses requests and provides a writer.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use tracing::{error, info, warn};

use crate::core::cancel::HaltResult;
use crate::session::registry::RegistrationGuard;
use crate::session::request::OpenRequest;
use crate::session::writer::ResponseWriter;
use crate::session::{RunOutcome, Session, SessionRegistry};

/// Work performed for one session between its `start` and `finish`
/// notifications.
pub trait QueryRunner: Send + Sync {
    fn run(&self, session: &Session) -> HaltResult<()>;
}

/// Result of routing a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The session was found and its token set.
    Stopping,
    /// Unknown id, or the session already finished.
    NotFound,
}

/// A session accepted by [`Dispatcher::open_session`].
pub struct SessionHandle {
    session: Arc<Session>,
    worker: JoinHandle<()>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Wait for the worker to exit. Finish and cleanup have run by then.
    pub fn join(self) -> Result<()> {
        self.worker
            .join()
            .map_err(|_| anyhow!("session worker {} panicked", self.session.id()))
    }
}

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    runner: Arc<dyn QueryRunner>,
    junit_version: AtomicU32,
}

impl Dispatcher {
    pub fn new(runner: Arc<dyn QueryRunner>, default_junit_version: u32) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            runner,
            junit_version: AtomicU32::new(default_junit_version),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Version captured by sessions opened from now on.
    pub fn junit_version(&self) -> u32 {
        self.junit_version.load(Ordering::Acquire)
    }

    pub fn set_junit_version(&self, version: u32) {
        info!(junit_version = version, "junit version updated");
        self.junit_version.store(version, Ordering::Release);
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.registry.list_active_ids()
    }

    /// Register a session for `request` and run it on a dedicated thread.
    ///
    /// The session is reachable by [`Dispatcher::stop_session`] as soon as
    /// this returns. Every session that gets a worker writes `start` first
    /// and `finish` last, and leaves the registry when the worker exits.
    pub fn open_session(
        &self,
        request: OpenRequest,
        writer: Arc<dyn ResponseWriter>,
    ) -> Result<SessionHandle> {
        let session = Arc::new(Session::new(
            request.session_id,
            request.query,
            self.junit_version(),
            writer,
        ));
        let guard = RegistrationGuard::register(self.registry.clone(), session.clone());

        let runner = self.runner.clone();
        let worker_session = session.clone();
        let worker = thread::Builder::new()
            .name(format!("session-{}", session.id()))
            .spawn(move || {
                let _registration = guard;
                run_worker(&worker_session, runner.as_ref());
            })
            .with_context(|| format!("spawn worker for session {}", session.id()))?;

        Ok(SessionHandle { session, worker })
    }

    pub fn stop_session(&self, session_id: &str) -> StopOutcome {
        match self.registry.get(session_id) {
            Some(session) => {
                info!(session_id, "stop requested");
                session.request_stop();
                StopOutcome::Stopping
            }
            None => {
                warn!(session_id, "stop requested for unknown session");
                StopOutcome::NotFound
            }
        }
    }
}

fn run_worker(session: &Session, runner: &dyn QueryRunner) {
    if let Err(err) = session.write_start_message() {
        warn!(session_id = %session.id(), err = %format!("{err:#}"), "failed to write start message");
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| session.start(|s| runner.run(s))));
    let failure = match result {
        Ok(Ok(RunOutcome::Completed(()))) => {
            info!(session_id = %session.id(), "session completed");
            None
        }
        Ok(Ok(RunOutcome::Cancelled | RunOutcome::AlreadyRunning)) => None,
        Ok(Err(err)) => Some(format!("{err:#}")),
        Err(_) => Some("session worker panicked".to_string()),
    };
    if let Some(message) = failure {
        error!(session_id = %session.id(), err = %message, "session failed");
        if let Err(err) = session.write_error_message(&message) {
            warn!(session_id = %session.id(), err = %format!("{err:#}"), "failed to write error message");
        }
    }

    if let Err(err) = session.write_finish_message() {
        warn!(session_id = %session.id(), err = %format!("{err:#}"), "failed to write finish message");
    }
}
