//! Shared types for the Perceptix incident lifecycle orchestrator.
//!
//! This crate holds everything that crosses a component boundary: the data
//! model (observations, hypotheses, evidence, incident reports), the error
//! taxonomy, and configuration. The daemon and the operator CLI both depend
//! on it; it depends on nothing else in the workspace.

pub mod config;
pub mod error;
pub mod models;

pub use config::PerceptixConfig;
pub use error::{ModelError, PerceptixError};
pub use models::{
    AlertHistoryEntry, CodeCommit, Criticality, DecisionRecord, EvidenceItem, HistoricalBaseline,
    Hypothesis, IncidentReport, IncidentType, InvestigationStep, MetaAnalysisReport, MlPrediction,
    ObservationPackage, PatternInsight, PipelineEvent, ReasoningOutput, ReasoningResult,
    RulesEvaluation, SlaDefinition, SystemMetadata, SystemMode, SystemState, TableMetric,
    Telemetry, ToolResult, ToolStatus, VerificationResult, VerificationStatus,
};
