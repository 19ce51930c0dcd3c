//! Status reconciliation primitives.
//!
//! This library holds the pure state machines of the status engine. Nothing
//! here performs I/O: callers load a document, apply one of these functions
//! inside an atomic read-modify-write, and persist the result.
//!
//! - **Instance status machine**: orchestrator (desired, observed) → instance status.
//! - **Deployment aggregator**: instance map + signals → one deployment status.
//! - **Entity reconciler**: per-environment snapshots → one entity status.
//!
//! # Invariants
//!
//! - Every mutation is idempotent: applying the same fact twice changes nothing
//!   the second time
//! - Per-key facts are guarded by timestamps, so the final state does not depend
//!   on delivery order
//! - `Created` and `Decommissioned` entities are never re-evaluated backwards

mod config;
mod deployment;
mod entity;
mod instance;
mod status_rules;

pub use config::{
    ReconcileConfig, DEFAULT_CRASH_LOOP_DEATHS, DEFAULT_CRASH_LOOP_WINDOW, DEFAULT_ENVIRONMENTS,
    DEFAULT_INSTANCE_CAP,
};
pub use deployment::{
    Deployment, DeploymentRequest, InstanceRecord, InstanceWrite, LinkOutcome, SignalRecord,
};
pub use entity::{Decommission, EnvProgress, Entity, EntityMetadata};
pub use instance::instance_status;
pub use status_rules::{derive_entity_status, EntityStatusRule};
