//! Cooperative cancellation shared between a session and its worker.
//!
//! A [`CancellationToken`] is a one-way flag: once set it stays set. Every
//! checkpoint-bearing operation returns [`HaltResult`], so a stop request
//! travels back to the caller as an ordinary value instead of unwinding.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Shared, thread-safe cancellation flag.
///
/// Clones observe the same flag. There is no reset.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the token as cancelled. Idempotent, callable from any thread.
    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Return `Err(Halt::Cancelled)` once the token is set.
    pub fn checkpoint(&self) -> HaltResult<()> {
        if self.is_set() {
            return Err(Halt::Cancelled);
        }
        Ok(())
    }
}

/// Why a checkpoint-bearing operation stopped before producing a value.
#[derive(Debug, Error)]
pub enum Halt {
    /// A stop request was observed at a checkpoint. Expected, not a fault.
    #[error("generation cancelled by user")]
    Cancelled,
    /// Anything else; surfaces to the dispatcher as an internal error.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl Halt {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Halt::Cancelled)
    }
}

pub type HaltResult<T> = std::result::Result<T, Halt>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn set_is_idempotent() {
        let token = CancellationToken::new();
        assert!(!token.is_set());
        token.set();
        token.set();
        token.set();
        assert!(token.is_set());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let observer = token.clone();
        token.set();
        assert!(observer.is_set());
    }

    #[test]
    fn set_on_another_thread_is_visible() {
        let token = CancellationToken::new();
        let remote = token.clone();
        thread::spawn(move || remote.set())
            .join()
            .expect("join setter");
        assert!(token.is_set());
    }

    #[test]
    fn checkpoint_reports_cancellation() {
        let token = CancellationToken::new();
        assert!(token.checkpoint().is_ok());
        token.set();
        let err = token.checkpoint().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn anyhow_errors_convert_to_failed() {
        fn fails() -> HaltResult<()> {
            let result: anyhow::Result<()> = Err(anyhow::anyhow!("boom"));
            result?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "boom");
    }
}
