//! # cdp-id
//!
//! Typed identifiers used by the status reconciliation engine.
//!
//! ## Design Principles
//!
//! - Identifiers from different systems never mix: a platform-issued
//!   deployment id cannot be passed where an orchestrator deployment id is
//!   expected
//! - Identifiers are opaque strings on the wire (orchestrator ARNs, UUIDs,
//!   service names) and are only validated for emptiness and stray whitespace
//! - Platform-issued ids are generated here; orchestrator ids are only parsed
//!
//! ## Identifier Sources
//!
//! - `CdpDeploymentId`: issued by the platform when a deployment is requested
//! - `LambdaId`: issued by the orchestrator's deployer once the request lands
//! - `InstanceId`: the orchestrator task ARN of one running instance
//! - `TaskDefinitionArn`: the orchestrator task definition a task runs
//! - `EntityName`: the tenant service name, unique across environments
//! - `MessageId`: the queue envelope id, used for tracing only

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use macros::MAX_ID_LEN;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
