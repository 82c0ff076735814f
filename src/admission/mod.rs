//! Limit the max number of requests being concurrently processed, queue the
//! excess in arrival order and drain what is in flight on shutdown.

use serde::Deserialize;
use std::time::Duration;

mod controller;
mod future;
mod layer;
mod service;

pub use controller::{
    AdmissionError, Controller, Phase, Rejection, ShutdownOutcome, SlotToken, Stats, Verdict,
};
pub use future::Deferred;
pub use layer::AdmissionLimitLayer;
pub use service::AdmissionLimit;

const fn default_limit() -> usize {
    3
}

const fn default_shutdown_timeout_secs() -> u64 {
    5
}

#[derive(Clone, Copy, Debug, Derivative, Deserialize, PartialEq, Eq)]
#[derivative(Default)]
#[serde(deny_unknown_fields)]
pub struct AdmissionSettings {
    /// Maximum number of requests processed at the same time.
    #[serde(default = "default_limit")]
    #[derivative(Default(value = "default_limit()"))]
    pub limit: usize,

    /// How long shutdown waits for active requests before abandoning them.
    #[serde(default = "default_shutdown_timeout_secs")]
    #[derivative(Default(value = "default_shutdown_timeout_secs()"))]
    pub shutdown_timeout_secs: u64,
}

impl AdmissionSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn build(&self) -> Result<Controller, AdmissionError> {
        Controller::new(self.limit)
    }
}
