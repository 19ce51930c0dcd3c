//! CDP status engine library.
//!
//! The crate ships a `status-engine` binary; the library surface exists so
//! integration tests can drive the engine over in-memory backends.

pub mod api;
pub mod artifacts;
pub mod config;
pub mod consumer;
pub mod db;
pub mod engine;
pub mod resources;
pub mod state;
pub mod store;
pub mod sweep;
