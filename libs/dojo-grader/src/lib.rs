//! Grading core: run submissions, compare against the reference, keep
//! learner progress.

pub mod achievements;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod messages;
pub mod normalizer;
pub mod sandbox;
pub mod selection;
pub mod similarity;
pub mod validator;

pub use engine::CodeRunner;
pub use validator::{GraderSettings, Validator};
