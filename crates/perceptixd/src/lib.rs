//! Perceptix daemon library - exposes components for testing.

pub mod escalator;
pub mod historian;
pub mod investigator;
pub mod meta_learner;
pub mod metrics;
pub mod observer;
pub mod orchestrator;
pub mod policy;
pub mod reasoner;
pub mod remediation;
pub mod verifier;
