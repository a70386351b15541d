//! Rule-and-model decision scoring for one symbol at a time.

pub mod engine;

pub use engine::{model_confidence, vote, DecisionEngine};
