//! Per-request session context: cancellation, message log, result sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::cancel::{CancellationToken, Halt, HaltResult};
use crate::core::types::{ChatMessage, QueryData};
use crate::session::messages::Outbound;
use crate::session::writer::{ResponseWriter, WriteError};

/// How a call to [`Session::start`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome<T> {
    Completed(T),
    /// A stop request was observed at a checkpoint.
    Cancelled,
    /// The session was already running; the callback was not invoked.
    AlreadyRunning,
}

/// One client-visible, cancellable unit of orchestration work.
pub struct Session {
    id: String,
    query: QueryData,
    junit_version: u32,
    token: CancellationToken,
    messages: Mutex<Vec<ChatMessage>>,
    writer: Arc<dyn ResponseWriter>,
    running: AtomicBool,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        query: QueryData,
        junit_version: u32,
        writer: Arc<dyn ResponseWriter>,
    ) -> Self {
        Self {
            id: id.into(),
            query,
            junit_version,
            token: CancellationToken::new(),
            messages: Mutex::new(Vec::new()),
            writer,
            running: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn query(&self) -> &QueryData {
        &self.query
    }

    /// JUnit major version captured when the session was opened.
    pub fn junit_version(&self) -> u32 {
        self.junit_version
    }

    /// Token shared with capabilities acting on behalf of this session.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run `run` with this session unless a run is already in progress.
    ///
    /// Cancellation is reported as [`RunOutcome::Cancelled`]; any other halt
    /// is returned as an error. The session is idle again on every path.
    pub fn start<T, F>(&self, run: F) -> Result<RunOutcome<T>>
    where
        F: FnOnce(&Session) -> HaltResult<T>,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(session_id = %self.id, "session already running");
            return Ok(RunOutcome::AlreadyRunning);
        }
        let _idle = IdleOnDrop(&self.running);

        info!(session_id = %self.id, "starting query session");
        match run(self) {
            Ok(value) => Ok(RunOutcome::Completed(value)),
            Err(Halt::Cancelled) => {
                info!(session_id = %self.id, "query session cancelled by user");
                Ok(RunOutcome::Cancelled)
            }
            Err(Halt::Failed(err)) => Err(err),
        }
    }

    pub fn request_stop(&self) {
        self.token.set();
    }

    pub fn should_stop(&self) -> bool {
        self.token.is_set()
    }

    pub fn checkpoint(&self) -> HaltResult<()> {
        self.token.checkpoint()
    }

    /// Snapshot of the last log pushed with [`Session::update_messages`].
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the stored log and stream it in full as a `msg` notification.
    pub fn update_messages(&self, messages: Vec<ChatMessage>) -> Result<()> {
        let mut stored = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        let notification = Outbound::msg(&self.id, messages.clone());
        *stored = messages;
        self.send(&notification)
    }

    pub fn write_start_message(&self) -> Result<()> {
        self.send(&Outbound::start(&self.id))
    }

    pub fn write_finish_message(&self) -> Result<()> {
        self.send(&Outbound::finish(&self.id))
    }

    pub fn write_no_reference_message(&self) -> Result<()> {
        self.send(&Outbound::no_reference(&self.id, self.junit_version))
    }

    pub fn write_error_message(&self, message: &str) -> Result<()> {
        self.send(&Outbound::error(message))
    }

    /// Deliver one notification. A vanished client is not an error: the
    /// session stops itself and the orchestrator winds down at its next
    /// checkpoint.
    fn send(&self, message: &Outbound) -> Result<()> {
        let line = message.encode()?;
        match self.writer.write_line(&line) {
            Ok(()) => Ok(()),
            Err(WriteError::Disconnected) => {
                warn!(session_id = %self.id, "connection closed, stopping session");
                self.request_stop();
                Ok(())
            }
            Err(err) => {
                debug!(session_id = %self.id, err = %err, "notification write failed");
                Err(err).with_context(|| format!("write notification for session {}", self.id))
            }
        }
    }
}

struct IdleOnDrop<'a>(&'a AtomicBool);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
