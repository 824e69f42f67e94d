//! Hypothesis verification and incident report synthesis.
//!
//! The verifier reviews the primary hypothesis against the collected
//! evidence and produces the immutable incident report. The model verdict
//! runs under the shared reasoning budget; a deterministic evidence matcher
//! doubles as fallback and as a guardrail that upgrades a conservative model
//! verdict when the evidence is conclusive on its own.

use crate::reasoner::{LlmRuntime, ReasoningSession};
use chrono::Utc;
use perceptix_common::models::{
    DecisionRecord, EvidenceItem, Hypothesis, IncidentReport, IncidentType, VerificationResult,
    VerificationStatus,
};
use perceptix_common::{PerceptixConfig, PerceptixError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct Verifier {
    config: PerceptixConfig,
    runtime: Arc<LlmRuntime>,
}

impl Verifier {
    pub fn new(config: &PerceptixConfig, runtime: Arc<LlmRuntime>) -> Self {
        Self {
            config: config.clone(),
            runtime,
        }
    }

    /// Synthesize the findings into a final report.
    ///
    /// Errors only when no evidence exists at all; every other degradation
    /// resolves through the deterministic matcher.
    pub async fn verify_incident(
        &self,
        hypothesis: &Hypothesis,
        evidence_chain: &[EvidenceItem],
        detected_anomalies: &[String],
        cycle_id: u64,
        mut decision_log: Vec<DecisionRecord>,
        session: &mut ReasoningSession,
    ) -> Result<IncidentReport, PerceptixError> {
        info!("Verifying hypothesis: {}", hypothesis.id);

        if evidence_chain.is_empty() {
            return Err(PerceptixError::InsufficientEvidence(format!(
                "No evidence collected for verification of {}",
                hypothesis.id
            )));
        }

        let incident_type = classify_incident(hypothesis, evidence_chain);

        let evidence_text: String = evidence_chain
            .iter()
            .map(|e| {
                format!(
                    "- {}: {}\n",
                    e.action,
                    serde_json::to_string(&e.evidence).unwrap_or_default()
                )
            })
            .collect();

        let prompt = format!(
            "You are a data reliability verification agent. Verify the following hypothesis based ONLY on the evidence provided.\n\n\
             Hypothesis: {}\n\n\
             Collected Evidence:\n{}\n\
             Task:\n\
             1. Analyze if the evidence supports or contradicts the hypothesis.\n\
             2. Determine a verification status (CONFIRMED, REJECTED, or WEAK_EVIDENCE).\n\
             3. Assign a confidence score (0-100).\n\
             4. Provide a rationale.\n\n\
             Return JSON format:\n\
             {{\n    \"status\": \"CONFIRMED|REJECTED|WEAK_EVIDENCE|UNVERIFIED\",\n    \
             \"confidence\": <float>,\n    \"rationale\": \"<string>\"\n}}\n",
            hypothesis.description, evidence_text
        );

        let fallback_verdict = deterministic_verdict(hypothesis, evidence_chain, incident_type);
        let fallback_payload = verdict_to_payload(&fallback_verdict);
        let (payload, meta) = self
            .runtime
            .generate(session, "verify", &prompt, move || fallback_payload)
            .await?;

        let (mut status, mut confidence, mut rationale) = parse_verdict_payload(&payload);

        // Guardrail: when the deterministic matcher can conclusively confirm
        // the incident but the model verdict is weaker, the matcher wins.
        // The override is recorded so the decision log shows both verdicts.
        let threshold = self.config.system.confidence_threshold;
        let mut guardrail_applied = false;
        if fallback_verdict.0 == VerificationStatus::Confirmed
            && fallback_verdict.1 >= threshold
            && (status != VerificationStatus::Confirmed || confidence < threshold)
        {
            guardrail_applied = true;
            status = fallback_verdict.0;
            confidence = fallback_verdict.1;
            rationale = if rationale.is_empty() || rationale.contains("Guardrail") {
                fallback_verdict.2.clone()
            } else {
                format!("{}\n\nGuardrail: {}", rationale, fallback_verdict.2)
            };
        }

        decision_log.push(
            DecisionRecord::new("verify", rationale.clone())
                .with_data(json!({
                    "status": status.as_str(),
                    "confidence": confidence,
                    "guardrail_applied": guardrail_applied,
                }))
                .with_meta(meta.to_value()),
        );

        let report = IncidentReport {
            report_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            cycle_id,
            incident_type,
            status: if status == VerificationStatus::Confirmed {
                "VERIFIED".to_string()
            } else {
                "DETECTED".to_string()
            },
            llm_provider: Some(if meta.api_used {
                self.config.api.provider.clone()
            } else {
                "fallback".to_string()
            }),
            llm_model: meta.api_used.then(|| self.config.api.model_name.clone()),
            confidence_threshold: Some(threshold),
            trigger_signals: detected_anomalies.to_vec(),
            primary_hypothesis: hypothesis.description.clone(),
            verification_status: status,
            verification_result: Some(VerificationResult {
                is_verified: status == VerificationStatus::Confirmed,
                verification_confidence: confidence,
                summary: rationale.clone(),
            }),
            final_confidence_score: confidence,
            root_cause_analysis: rationale.clone(),
            mitigation_status: "PENDING".to_string(),
            evidence_summary: vec![format!("Analysis by AI: {}", rationale)],
            anomaly_evidence: detected_anomalies.to_vec(),
            recommended_actions: recommended_actions(incident_type, status),
            decision_log,
        };

        info!(
            "Verification complete: status={}, confidence={:.1}%",
            status, confidence
        );
        Ok(report)
    }
}

fn find_evidence<'a>(chain: &'a [EvidenceItem], action: &str) -> Option<&'a EvidenceItem> {
    chain.iter().find(|e| e.action == action)
}

/// Classify the incident from evidence first, hypothesis keywords second.
fn classify_incident(hypothesis: &Hypothesis, evidence_chain: &[EvidenceItem]) -> IncidentType {
    let mut incident_type = IncidentType::DataIntegrityFailure;

    let git = find_evidence(evidence_chain, "check_git_diff");
    let etl = find_evidence(evidence_chain, "verify_etl_mapping");
    if let (Some(git), Some(etl)) = (git, etl) {
        let diff = git.evidence.detail_str("diff_summary").unwrap_or("");
        let expected_key = etl
            .evidence
            .details
            .get("current_mapping")
            .and_then(|m| m.get("source_expected_key"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if diff.contains("source_id") || expected_key.contains("tracking_pixel_id") {
            incident_type = IncidentType::SchemaChange;
        }
    }

    let description = hypothesis.description.to_lowercase();
    if ["schema", "rename", "field", "type"]
        .iter()
        .any(|k| description.contains(k))
    {
        IncidentType::SchemaChange
    } else if description.contains("latency") {
        IncidentType::ApiLatencySpike
    } else if description.contains("inventory") {
        IncidentType::DataIntegrityFailure
    } else {
        incident_type
    }
}

/// Deterministic evidence matcher. Serves as the model fallback and as the
/// guardrail that can upgrade a weak model verdict.
fn deterministic_verdict(
    hypothesis: &Hypothesis,
    evidence_chain: &[EvidenceItem],
    incident_type: IncidentType,
) -> (VerificationStatus, f64, String) {
    let git = find_evidence(evidence_chain, "check_git_diff");
    let etl = find_evidence(evidence_chain, "verify_etl_mapping");
    let monitor = find_evidence(evidence_chain, "monitor_baseline");

    let confidence = hypothesis.confidence_score;

    if let (Some(git), Some(etl)) = (git, etl) {
        if incident_type == IncidentType::SchemaChange {
            let diff = git.evidence.detail_str("diff_summary").unwrap_or("");
            let etl_key = etl
                .evidence
                .details
                .get("current_mapping")
                .and_then(|m| m.get("source_expected_key"))
                .and_then(Value::as_str)
                .unwrap_or("");
            if diff.contains("source_id") && etl_key.contains("tracking_pixel_id") {
                return (
                    VerificationStatus::Confirmed,
                    99.0,
                    format!(
                        "Root cause for {} positively identified. Codebase renamed field to \
                         'source_id' but ETL config expects 'tracking_pixel_id'.",
                        incident_type
                    ),
                );
            }
        }
    }

    if hypothesis.description.to_lowercase().contains("inventory") {
        if let Some(git) = git {
            let diff = git.evidence.detail_str("diff_summary").unwrap_or("");
            if diff.contains("last_updated") && diff.contains('#') {
                return (
                    VerificationStatus::Confirmed,
                    99.0,
                    "Root cause for Data Integrity Failure confirmed. Developer commented out \
                     timestamp update in inventory sync job."
                        .to_string(),
                );
            }
        }
    }

    if let Some(monitor) = monitor {
        if monitor.evidence.status == perceptix_common::models::ToolStatus::Success {
            return (
                VerificationStatus::Confirmed,
                confidence,
                "System metrics confirmed within normal parameters.".to_string(),
            );
        }
    }

    (
        VerificationStatus::WeakEvidence,
        (confidence - 20.0).max(0.0),
        "Evidence found but does not conclusively match the hypothesis (fallback logic).".to_string(),
    )
}

fn verdict_to_payload(verdict: &(VerificationStatus, f64, String)) -> Value {
    json!({
        "status": verdict.0.as_str(),
        "confidence": verdict.1,
        "rationale": verdict.2,
    })
}

fn parse_verdict_payload(payload: &Value) -> (VerificationStatus, f64, String) {
    let status = match payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("UNVERIFIED")
        .to_ascii_uppercase()
        .as_str()
    {
        "CONFIRMED" => VerificationStatus::Confirmed,
        "REJECTED" | "REFUTED" => VerificationStatus::Rejected,
        "WEAK_EVIDENCE" => VerificationStatus::WeakEvidence,
        _ => VerificationStatus::Unverified,
    };
    let confidence = payload
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let rationale = payload
        .get("rationale")
        .and_then(Value::as_str)
        .unwrap_or("No rationale provided by verifier")
        .to_string();
    (status, confidence, rationale)
}

fn recommended_actions(incident_type: IncidentType, status: VerificationStatus) -> Vec<String> {
    if status != VerificationStatus::Confirmed {
        return vec![
            "Collect more evidence".to_string(),
            "Check upstream dependencies".to_string(),
        ];
    }
    match incident_type {
        IncidentType::SchemaChange => vec![
            "Update ETL mapping configuration".to_string(),
            "Re-execute failed data pipeline jobs".to_string(),
            "Notify downstream consumers of field rename".to_string(),
        ],
        IncidentType::DataIntegrityFailure => vec![
            "Re-sync inventory data from source".to_string(),
            "Verify checkout-service event logging".to_string(),
            "Audit recent deployments in checkout-service".to_string(),
        ],
        IncidentType::ApiLatencySpike => vec![
            "Check database query performance".to_string(),
            "Scale out API instances".to_string(),
            "Verify network latency between services".to_string(),
        ],
        _ => vec![
            "Monitor system metrics".to_string(),
            "Notify engineering team".to_string(),
        ],
    }
}

#[cfg(test)]
pub mod tests_support {
    use super::*;

    pub fn sample_hypothesis() -> Hypothesis {
        Hypothesis {
            id: "H1".to_string(),
            description: "Schema Mismatch: Upstream checkout-service renamed the tracking field."
                .to_string(),
            supporting_evidence: "Null spike is near 100% after the rename commit.".to_string(),
            confidence_score: 95.0,
        }
    }

    pub fn sample_report() -> IncidentReport {
        IncidentReport {
            report_id: "00000000-0000-0000-0000-000000000001".to_string(),
            timestamp: Utc::now(),
            cycle_id: 1,
            incident_type: IncidentType::SchemaChange,
            status: "VERIFIED".to_string(),
            llm_provider: Some("fallback".to_string()),
            llm_model: None,
            confidence_threshold: Some(85.0),
            trigger_signals: vec!["Severe Null Rate in orders_table.attribution_source".to_string()],
            primary_hypothesis: sample_hypothesis().description,
            verification_status: VerificationStatus::Confirmed,
            verification_result: Some(VerificationResult {
                is_verified: true,
                verification_confidence: 99.0,
                summary: "Field rename confirmed".to_string(),
            }),
            final_confidence_score: 99.0,
            root_cause_analysis:
                "Codebase renamed field to 'source_id' but ETL config expects 'tracking_pixel_id'."
                    .to_string(),
            mitigation_status: "PENDING".to_string(),
            evidence_summary: vec!["Analysis by AI: field rename confirmed".to_string()],
            anomaly_evidence: Vec::new(),
            recommended_actions: vec!["Update ETL mapping configuration".to_string()],
            decision_log: Vec::new(),
        }
    }
}
