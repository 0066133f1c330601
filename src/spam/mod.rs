//! Heuristic spam classification of user-generated content.

mod classifier;
pub mod patterns;

pub use classifier::{ActivitySource, SpamClassifier, SpamVerdict};
