//! Periodic bulk status sweep.
//!
//! Re-derives entity status on an interval so that records whose derived
//! status drifted (for example after an environment was removed rather than
//! updated) converge without waiting for another event.

mod worker;

pub use worker::{SweepWorker, SweepWorkerConfig};
