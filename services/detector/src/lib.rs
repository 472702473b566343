//! Proxy and Tor exit-node detection service.
//!
//! This crate primarily ships a `proxy-detector` binary, but we expose a
//! library surface to enable integration testing and embedding the engine.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod probe;
pub mod reconciler;
pub mod state;

pub use engine::{BackendCounts, CacheRemoval, DeleteOutcome, ProxyDetector, StoreRemoval};
pub use error::DetectError;
