//! Shared application state for the HTTP handlers.

use std::sync::Arc;

use refiner::dispatch::Dispatcher;

/// State cloned into every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Owns the session registry, worker threads and JUnit version.
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}
