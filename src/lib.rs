//! Turnstile - In-Process Admission Control
//!
//! This crate decides, per caller and per action, whether an operation may
//! proceed right now. Each action is governed by one of three rate policies
//! (sliding window, token bucket, fixed window) over per-key state held in a
//! [`admission::Registry`]. A heuristic [`spam::SpamClassifier`] scores
//! user-generated content and can consult the registry for posting velocity.
//!
//! The engine is single-process: state is in memory and is not shared
//! across hosts.

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod spam;

pub use admission::{Action, AdmissionController, AdmissionResult, Context, Registry};
pub use error::{AdmissionError, GuardedError, Result};
pub use spam::{SpamClassifier, SpamVerdict};
