//! Application state shared across request handlers.

use std::sync::Arc;

use crate::engine::StatusEngine;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    engine: Arc<StatusEngine>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(engine: Arc<StatusEngine>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { engine }),
        }
    }

    /// Get a reference to the engine.
    pub fn engine(&self) -> &StatusEngine {
        &self.inner.engine
    }
}
