//! Application state shared across request handlers.

use std::sync::Arc;

use crate::engine::ProxyDetector;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    detector: ProxyDetector,
}

impl AppState {
    /// Create a new application state.
    pub fn new(detector: ProxyDetector) -> Self {
        Self {
            inner: Arc::new(AppStateInner { detector }),
        }
    }

    /// Get a reference to the detection engine.
    pub fn detector(&self) -> &ProxyDetector {
        &self.inner.detector
    }
}
