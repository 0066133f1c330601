//! Admission control: rate policies, per-key state and the public facade.

pub mod algorithm;
mod controller;
mod entry;
mod events;
mod key;
mod registry;
mod result;
mod rules;
mod sweeper;

pub use controller::AdmissionController;
pub use entry::Entry;
pub use events::{AdmissionEvents, SpamFlag, TracingEvents};
pub use key::{AdmissionKey, Context, KeyComposer};
pub use registry::{Registry, SweepReport};
pub use result::{AdmissionResult, RATE_LIMIT_EXCEEDED};
pub use rules::{Action, Algorithm, ConfigOverride, KeyFn, Rule, RuleSet};
pub use sweeper::{SweeperHandle, DEFAULT_SWEEP_INTERVAL};
