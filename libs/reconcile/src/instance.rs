//! Orchestrator task state → instance status.

use cdp_events::{DesiredState, InstanceStatus, ObservedState};

/// Maps an orchestrator (desired, observed) pair to an instance status.
///
/// Returns `None` for pairs outside the table; callers drop those events
/// without touching stored state.
pub fn instance_status(desired: DesiredState, observed: ObservedState) -> Option<InstanceStatus> {
    match (desired, observed) {
        (
            DesiredState::Running,
            ObservedState::Provisioning | ObservedState::Pending | ObservedState::Activating,
        ) => Some(InstanceStatus::Pending),
        (DesiredState::Running, ObservedState::Running) => Some(InstanceStatus::Running),
        (
            DesiredState::Stopped,
            ObservedState::Deactivating | ObservedState::Stopping | ObservedState::Deprovisioning,
        ) => Some(InstanceStatus::Stopping),
        (DesiredState::Stopped, ObservedState::Stopped) => Some(InstanceStatus::Stopped),
        _ => None,
    }
}
