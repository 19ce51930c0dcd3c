//! Tunables shared by the deployment and entity state machines.

use std::time::Duration;

/// Maximum number of instance entries kept on one deployment.
pub const DEFAULT_INSTANCE_CAP: usize = 50;

/// Trailing window in which instance deaths count towards a crash loop.
pub const DEFAULT_CRASH_LOOP_WINDOW: Duration = Duration::from_secs(6 * 60);

/// Deaths inside the window that, next to a live instance, mark a crash loop.
pub const DEFAULT_CRASH_LOOP_DEATHS: usize = 4;

/// Platform environments every unrestricted entity must be created in.
pub const DEFAULT_ENVIRONMENTS: [&str; 7] = [
    "infra-dev",
    "management",
    "dev",
    "test",
    "perf-test",
    "ext-test",
    "prod",
];

/// Reconciliation configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Canonical environment list used for entity completion.
    pub environments: Vec<String>,

    /// Cap on instance entries per deployment.
    pub instance_cap: usize,

    /// Crash-loop detection window.
    pub crash_loop_window: Duration,

    /// Crash-loop death threshold.
    pub crash_loop_deaths: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            environments: DEFAULT_ENVIRONMENTS.iter().map(|e| e.to_string()).collect(),
            instance_cap: DEFAULT_INSTANCE_CAP,
            crash_loop_window: DEFAULT_CRASH_LOOP_WINDOW,
            crash_loop_deaths: DEFAULT_CRASH_LOOP_DEATHS,
        }
    }
}

impl ReconcileConfig {
    /// Default tunables with a custom environment list.
    pub fn with_environments<I, S>(environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            environments: environments.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}
