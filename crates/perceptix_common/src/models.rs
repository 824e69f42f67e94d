//! Core data model for the incident lifecycle.
//!
//! Every structure that crosses a component boundary lives here: observation
//! snapshots coming in from connectors, the reasoning output (hypotheses and
//! investigation plans), evidence collected by the investigator, and the
//! immutable incident report produced by the verifier. Wire names use
//! SCREAMING_SNAKE_CASE for enums to stay compatible with stored incidents.

use crate::error::ModelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// ENUMS
// ============================================================================

/// Incident classes detected by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentType {
    DataIntegrityFailure,
    RowCountDrop,
    SchemaChange,
    ApiLatencySpike,
    FreshnessViolation,
    DistributionDrift,
    UpstreamDelay,
    Unknown,
}

impl IncidentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::DataIntegrityFailure => "DATA_INTEGRITY_FAILURE",
            IncidentType::RowCountDrop => "ROW_COUNT_DROP",
            IncidentType::SchemaChange => "SCHEMA_CHANGE",
            IncidentType::ApiLatencySpike => "API_LATENCY_SPIKE",
            IncidentType::FreshnessViolation => "FRESHNESS_VIOLATION",
            IncidentType::DistributionDrift => "DISTRIBUTION_DRIFT",
            IncidentType::UpstreamDelay => "UPSTREAM_DELAY",
            IncidentType::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of hypothesis verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Confirmed,
    WeakEvidence,
    Unverified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Confirmed => "CONFIRMED",
            VerificationStatus::WeakEvidence => "WEAK_EVIDENCE",
            VerificationStatus::Unverified => "UNVERIFIED",
            VerificationStatus::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incident severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Criticality {
    P0,
    P1,
    P2,
    P3,
}

impl std::fmt::Display for Criticality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Criticality::P0 => f.write_str("P0"),
            Criticality::P1 => f.write_str("P1"),
            Criticality::P2 => f.write_str("P2"),
            Criticality::P3 => f.write_str("P3"),
        }
    }
}

/// Operating modes for the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemMode {
    Production,
    Demo,
    Mock,
}

// ============================================================================
// OBSERVER MODELS
// ============================================================================

/// Metrics for a single table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMetric {
    pub row_count: u64,
    /// Minutes since last data update.
    pub freshness_minutes: u64,
    /// Null rates per column, each in [0, 1].
    pub null_rates: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl TableMetric {
    pub fn validate(&self) -> Result<(), ModelError> {
        for (column, rate) in &self.null_rates {
            if !(0.0..=1.0).contains(rate) {
                return Err(ModelError::NullRateOutOfRange {
                    column: column.clone(),
                    rate: *rate,
                });
            }
        }
        Ok(())
    }
}

/// Seven-day historical baseline for a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalBaseline {
    pub avg_daily_rows: u64,
    pub avg_attribution_null_rate: f64,
}

/// Git commit information surfaced by the observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeCommit {
    pub repo: String,
    pub author: String,
    pub message: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
}

/// Orchestration/observability signal ingested from pipeline webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub pipeline: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl PipelineEvent {
    /// True when the event signals a failed run or a high-severity condition.
    pub fn is_failure_signal(&self) -> bool {
        let status = self.status.to_ascii_uppercase();
        let severity = self.severity.to_ascii_uppercase();
        matches!(status.as_str(), "FAILED" | "FAILURE" | "ERROR")
            || matches!(severity.as_str(), "HIGH" | "CRITICAL" | "P0" | "P1")
    }
}

/// Service-level agreement for a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaDefinition {
    pub max_staleness_minutes: u64,
    pub criticality: Criticality,
    pub stakeholders: Vec<String>,
}

/// Historical alert record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertHistoryEntry {
    pub timestamp: String,
    pub alert_type: String,
    pub table: String,
    pub resolution: String,
    #[serde(default)]
    pub notes: String,
}

/// System metadata attached to every snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetadata {
    pub domain: String,
    pub environment: String,
    pub timestamp: String,
}

/// Complete system state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemState {
    pub metadata: SystemMetadata,
    pub table_metrics: BTreeMap<String, TableMetric>,
    #[serde(default)]
    pub dependency_map: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub historical_baseline_7d: BTreeMap<String, HistoricalBaseline>,
    #[serde(default)]
    pub pipeline_events: Vec<PipelineEvent>,
    #[serde(default)]
    pub recent_code_commits: Vec<CodeCommit>,
    #[serde(default)]
    pub alert_history: Vec<AlertHistoryEntry>,
    #[serde(default)]
    pub sla_definitions: BTreeMap<String, SlaDefinition>,
}

impl SystemState {
    pub fn validate(&self) -> Result<(), ModelError> {
        for metric in self.table_metrics.values() {
            metric.validate()?;
        }
        Ok(())
    }
}

/// Anomaly prediction for one table from the ML layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlPrediction {
    pub is_anomaly: bool,
    pub confidence: f64,
}

/// Result of the declarative rules engine run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesEvaluation {
    pub triggered_count: u32,
    #[serde(default)]
    pub triggered_rules: Vec<String>,
}

/// Collection telemetry for one observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    pub trace_id: String,
    pub latency_ms: f64,
    pub component: String,
    pub version: String,
}

/// Package containing an observation plus anomaly-detection side channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationPackage {
    pub telemetry: Telemetry,
    pub payload: SystemState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ml_predictions: Option<HashMap<String, MlPrediction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_evaluation: Option<RulesEvaluation>,
}

// ============================================================================
// REASONER MODELS
// ============================================================================

/// Single root-cause hypothesis, immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Pattern `H<n>`, e.g. "H1".
    pub id: String,
    pub description: String,
    pub supporting_evidence: String,
    /// Confidence percentage in [0, 100].
    pub confidence_score: f64,
}

impl Hypothesis {
    pub fn validate(&self) -> Result<(), ModelError> {
        let digits = self.id.strip_prefix('H').unwrap_or("");
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ModelError::InvalidHypothesisId(self.id.clone()));
        }
        if self.description.len() < 10 {
            return Err(ModelError::FieldTooShort {
                field: "description",
                min: 10,
            });
        }
        if self.supporting_evidence.len() < 5 {
            return Err(ModelError::FieldTooShort {
                field: "supporting_evidence",
                min: 5,
            });
        }
        if !(0.0..=100.0).contains(&self.confidence_score) {
            return Err(ModelError::ConfidenceOutOfRange(self.confidence_score));
        }
        Ok(())
    }
}

/// Single step in an investigation plan. Consumed exactly once, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationStep {
    pub step_id: u32,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
}

impl InvestigationStep {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.step_id < 1 {
            return Err(ModelError::InvalidStepId(self.step_id));
        }
        if self.action.is_empty() {
            return Err(ModelError::Invalid("step action must not be empty".into()));
        }
        Ok(())
    }

    /// String-valued arg lookup used by tool dispatch.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }
}

/// Output of the reasoning stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningOutput {
    pub analysis_summary: String,
    #[serde(default)]
    pub detected_anomalies: Vec<String>,
    pub hypotheses: Vec<Hypothesis>,
    pub investigation_plan: Vec<InvestigationStep>,
    pub severity_assessment: Criticality,
}

impl ReasoningOutput {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.analysis_summary.len() < 10 {
            return Err(ModelError::FieldTooShort {
                field: "analysis_summary",
                min: 10,
            });
        }
        if self.hypotheses.is_empty() || self.hypotheses.len() > 10 {
            return Err(ModelError::Invalid(format!(
                "expected 1..=10 hypotheses, got {}",
                self.hypotheses.len()
            )));
        }
        for h in &self.hypotheses {
            h.validate()?;
        }
        if self.investigation_plan.is_empty() {
            return Err(ModelError::Invalid("investigation plan is empty".into()));
        }
        for step in &self.investigation_plan {
            step.validate()?;
        }
        Ok(())
    }
}

/// Reasoning output together with call metadata for the decision log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningResult {
    pub metadata: serde_json::Value,
    pub reasoning: ReasoningOutput,
}

// ============================================================================
// INVESTIGATOR MODELS
// ============================================================================

/// Execution status of one tool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Failure,
    Error,
    NoRelevantChanges,
}

impl ToolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::Success => "success",
            ToolStatus::Failure => "failure",
            ToolStatus::Error => "error",
            ToolStatus::NoRelevantChanges => "no_relevant_changes",
        }
    }
}

/// Result from executing an investigation tool. Tool-specific fields ride in
/// `details` so different tools can attach whatever payload they produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ToolResult {
    pub fn error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            status: ToolStatus::Error,
            message: Some(message.into()),
            details: serde_json::Map::new(),
        }
    }

    /// String-valued detail lookup used by the verifier's evidence matcher.
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(|v| v.as_str())
    }
}

/// One piece of evidence; exactly one exists per executed plan step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub step_id: u32,
    pub action: String,
    pub evidence: ToolResult,
}

// ============================================================================
// VERIFIER / REPORT MODELS
// ============================================================================

/// Verification outcome summary embedded in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_verified: bool,
    pub verification_confidence: f64,
    pub summary: String,
}

/// One structured record in the per-cycle decision log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub stage: String,
    pub summary: String,
    /// Stage-specific fields (verdicts, priorities, risk payloads).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    /// Reasoning-call metadata, appended verbatim for audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl DecisionRecord {
    pub fn new(stage: impl Into<String>, summary: impl Into<String>) -> Self {
        let mut summary = summary.into();
        if summary.len() > 280 {
            let mut end = 280;
            while !summary.is_char_boundary(end) {
                end -= 1;
            }
            summary.truncate(end);
        }
        Self {
            stage: stage.into(),
            summary,
            data: serde_json::Value::Null,
            meta: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Final incident report after verification. Immutable once constructed; the
/// only permitted later change is an external status transition to ARCHIVED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentReport {
    pub report_id: String,
    pub timestamp: DateTime<Utc>,
    pub cycle_id: u64,
    pub incident_type: IncidentType,
    /// "VERIFIED", "DETECTED", or "ARCHIVED".
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,
    #[serde(default)]
    pub trigger_signals: Vec<String>,
    pub primary_hypothesis: String,
    pub verification_status: VerificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_result: Option<VerificationResult>,
    pub final_confidence_score: f64,
    pub root_cause_analysis: String,
    #[serde(default = "default_mitigation_status")]
    pub mitigation_status: String,
    pub evidence_summary: Vec<String>,
    #[serde(default)]
    pub anomaly_evidence: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    #[serde(default)]
    pub decision_log: Vec<DecisionRecord>,
}

fn default_mitigation_status() -> String {
    "PENDING".to_string()
}

// ============================================================================
// META-LEARNING MODELS
// ============================================================================

/// Pattern detected by meta-learning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternInsight {
    pub culprit_service: String,
    pub frequency: u64,
    pub pattern_signature: String,
}

/// Periodic pattern-analysis report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaAnalysisReport {
    pub period_analyzed: String,
    pub total_incidents: u64,
    pub most_frequent_type: String,
    pub detected_pattern: PatternInsight,
    pub recommendation: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hypothesis() -> Hypothesis {
        Hypothesis {
            id: "H1".into(),
            description: "Schema mismatch between producer and ETL".into(),
            supporting_evidence: "Recent commit renamed the tracking field".into(),
            confidence_score: 95.0,
        }
    }

    #[test]
    fn test_hypothesis_valid() {
        assert!(hypothesis().validate().is_ok());
    }

    #[test]
    fn test_hypothesis_bad_id() {
        let mut h = hypothesis();
        h.id = "X1".into();
        assert!(matches!(
            h.validate(),
            Err(ModelError::InvalidHypothesisId(_))
        ));
        h.id = "H".into();
        assert!(h.validate().is_err());
    }

    #[test]
    fn test_hypothesis_confidence_range() {
        let mut h = hypothesis();
        h.confidence_score = 100.5;
        assert!(matches!(
            h.validate(),
            Err(ModelError::ConfidenceOutOfRange(_))
        ));
    }

    #[test]
    fn test_step_requires_positive_id() {
        let step = InvestigationStep {
            step_id: 0,
            action: "check_git_diff".into(),
            target: None,
            args: HashMap::new(),
        };
        assert!(step.validate().is_err());
    }

    #[test]
    fn test_null_rate_bounds() {
        let mut metric = TableMetric {
            row_count: 10,
            freshness_minutes: 5,
            null_rates: HashMap::from([("col".to_string(), 1.2)]),
            last_updated: None,
        };
        assert!(metric.validate().is_err());
        metric.null_rates.insert("col".into(), 0.5);
        assert!(metric.validate().is_ok());
    }

    #[test]
    fn test_pipeline_event_failure_signal() {
        let evt = PipelineEvent {
            pipeline: "inventory_sync".into(),
            status: "FAILED".into(),
            severity: String::new(),
            timestamp: None,
        };
        assert!(evt.is_failure_signal());

        let evt = PipelineEvent {
            pipeline: "inventory_sync".into(),
            status: "completed".into(),
            severity: "HIGH".into(),
            timestamp: None,
        };
        assert!(evt.is_failure_signal());

        let evt = PipelineEvent {
            pipeline: "inventory_sync".into(),
            status: "completed".into(),
            severity: "low".into(),
            timestamp: None,
        };
        assert!(!evt.is_failure_signal());
    }

    #[test]
    fn test_incident_type_wire_format() {
        let json = serde_json::to_string(&IncidentType::SchemaChange).unwrap();
        assert_eq!(json, "\"SCHEMA_CHANGE\"");
        let back: IncidentType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, IncidentType::SchemaChange);
    }

    #[test]
    fn test_tool_status_wire_format() {
        let json = serde_json::to_string(&ToolStatus::NoRelevantChanges).unwrap();
        assert_eq!(json, "\"no_relevant_changes\"");
    }

    #[test]
    fn test_decision_record_truncates_summary() {
        let rec = DecisionRecord::new("verify", "x".repeat(500));
        assert_eq!(rec.summary.len(), 280);
    }
}
