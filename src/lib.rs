#[macro_use]
extern crate derivative;
#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_events;
pub mod admission;
pub mod cli;
pub mod config;
pub mod http;
pub mod trace;

pub use admission::{Controller, ShutdownOutcome, SlotToken, Verdict};
