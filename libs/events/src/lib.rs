//! # cdp-events
//!
//! Lifecycle event definitions and normalization for the status engine.
//!
//! ## Design Principles
//!
//! - Raw envelopes arrive in several shapes (orchestrator event bus, platform
//!   deployer, CI); the normalizer turns every shape into one of four typed
//!   lifecycle events or a parse error
//! - Normalized events carry only facts; they never carry derived status
//! - The envelope message id is kept for tracing only and is never used for
//!   idempotency
//!
//! ## Event Types
//!
//! - Task state changed (orchestrator `ECS Task State Change`)
//! - Service deployment state changed (orchestrator `ECS Deployment State Change`)
//! - Deployment linked (platform deployer: platform id ↔ orchestrator id)
//! - Environment state snapshot (CI: full tenant list of one environment)

mod envelope;
mod error;
mod normalize;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use normalize::normalize;
pub use types::*;
