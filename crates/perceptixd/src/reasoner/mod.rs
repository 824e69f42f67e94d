//! Hypothesis generation and auxiliary reasoning stages.
//!
//! The reasoner drives every provider interaction in the cycle: triage, root
//! cause analysis, plan refinement, policy suggestion and remediation risk
//! assessment. All calls go through the shared [`LlmRuntime`], so they share
//! one response cache and the per-cycle budget. Every stage carries a
//! deterministic fallback, which means a dead provider degrades the cycle
//! instead of aborting it.

pub mod client;
pub mod runtime;
pub mod session;

pub use client::LlmClient;
pub use runtime::{CallMeta, LlmRuntime};
pub use session::{ReasoningBudget, ReasoningSession};

use perceptix_common::models::{
    IncidentReport, InvestigationStep, ObservationPackage, ReasoningOutput, ReasoningResult,
    SystemMode, SystemState,
};
use perceptix_common::{PerceptixConfig, PerceptixError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const COMPONENT_ID: &str = "reasoner";

pub struct Reasoner {
    config: PerceptixConfig,
    runtime: Arc<LlmRuntime>,
}

impl Reasoner {
    pub fn new(config: &PerceptixConfig) -> Self {
        let client = match config.system.mode {
            SystemMode::Mock => {
                info!("Running in MOCK mode; reasoning uses deterministic inference");
                None
            }
            _ => Some(LlmClient::from_config(&config.api)),
        };
        let runtime = Arc::new(LlmRuntime::new(client, config.reasoning.cache_max_entries));
        Self {
            config: config.clone(),
            runtime,
        }
    }

    pub fn runtime(&self) -> Arc<LlmRuntime> {
        Arc::clone(&self.runtime)
    }

    pub fn new_session(&self, trace_id: &str) -> ReasoningSession {
        ReasoningSession::new(
            trace_id,
            &self.config.api.model_name,
            &self.config.api.provider,
            ReasoningBudget {
                max_calls: self.config.reasoning.max_calls,
                max_prompt_chars: self.config.reasoning.max_prompt_chars,
            },
        )
    }

    /// Decide whether the triggers warrant a full investigation cycle, and
    /// with what priority. Advisory: the orchestrator logs the verdict but a
    /// triage failure never blocks the cycle.
    pub async fn triage(
        &self,
        triggers: &[String],
        observation: &ObservationPackage,
        session: &mut ReasoningSession,
    ) -> Result<(Value, CallMeta), PerceptixError> {
        let state = &observation.payload;

        let mut table_summaries = Vec::new();
        for (name, metric) in &state.table_metrics {
            let mut top_nulls: Vec<(&String, &f64)> = metric.null_rates.iter().collect();
            top_nulls.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
            table_summaries.push(json!({
                "table": name,
                "row_count": metric.row_count,
                "freshness_minutes": metric.freshness_minutes,
                "top_null_rates": top_nulls.iter().take(3)
                    .map(|(c, r)| json!([c, r])).collect::<Vec<_>>(),
            }));
        }

        let prompt = format!(
            "You are a data reliability triage agent.\n\
             Decide if we should run a full investigation cycle based on triggers and a brief state summary.\n\n\
             Triggers:\n{}\n\n\
             State summary:\n{}\n\n\
             Return STRICT JSON:\n\
             {{\n  \"should_investigate\": true|false,\n  \"priority\": \"P0\"|\"P1\"|\"P2\"|\"P3\",\n  \
             \"suspected_incident_types\": [\"SCHEMA_CHANGE\", \"FRESHNESS_VIOLATION\"],\n  \
             \"suggested_focus\": [\"short bullet\"],\n  \"rationale\": \"short justification\"\n}}\n",
            serde_json::to_string_pretty(triggers).unwrap_or_default(),
            serde_json::to_string_pretty(&json!({
                "tables": table_summaries,
                "pipeline_events_count": state.pipeline_events.len(),
                "recent_code_commits_count": state.recent_code_commits.len(),
            }))
            .unwrap_or_default(),
        );

        self.runtime
            .generate(session, "triage", &prompt, || triage_fallback(triggers))
            .await
    }

    /// Full root cause analysis: anomalies, ranked hypotheses and an
    /// investigation plan, followed by a best-effort plan refinement call.
    pub async fn generate_hypotheses(
        &self,
        observation: &ObservationPackage,
        session: &mut ReasoningSession,
    ) -> Result<ReasoningResult, PerceptixError> {
        let started = Instant::now();
        let trace_id = session.trace_id.clone();
        info!("[{}] Starting hypothesis generation", trace_id);

        let state = &observation.payload;
        let prompt = analysis_prompt(state)?;
        debug!("[{}] Prompt generated ({} chars)", trace_id, prompt.len());

        let (payload, meta) = self
            .runtime
            .generate(session, "reason", &prompt, || reasoning_fallback(state))
            .await?;

        let mut reasoning = parse_reasoning_output(payload).unwrap_or_else(|e| {
            warn!(
                "[{}] Provider reasoning output invalid ({}); using deterministic analysis",
                trace_id, e
            );
            parse_reasoning_output(reasoning_fallback(state))
                .expect("deterministic reasoning output is always valid")
        });

        // Separate, budgeted refinement call. Failure keeps the original plan.
        let mut plan_refined = false;
        match self.refine_plan(observation, &reasoning, session).await {
            Ok(Some(plan)) => {
                reasoning.investigation_plan = plan;
                plan_refined = true;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("[{}] Plan refinement failed, keeping original plan: {}", trace_id, e);
            }
        }

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            "[{}] Hypothesis generation complete: {} hypotheses, severity={}, latency={:.0}ms",
            trace_id,
            reasoning.hypotheses.len(),
            reasoning.severity_assessment,
            latency_ms
        );

        Ok(ReasoningResult {
            metadata: json!({
                "component": COMPONENT_ID,
                "trace_id": trace_id,
                "latency_ms": (latency_ms * 100.0).round() / 100.0,
                "provider": meta.provider,
                "model_name": meta.model_name,
                "api_used": meta.api_used,
                "reasoning_mode": if meta.api_used { "api" } else { "fallback" },
                "hypotheses_count": reasoning.hypotheses.len(),
                "session_calls": session.call_count,
                "session_cache_hits": session.cache_hits,
                "plan_refinement": plan_refined,
                "prompt_hash": meta.prompt_hash,
            }),
            reasoning,
        })
    }

    /// Ask for a tool plan only. Returns `Ok(None)` when the reply carries no
    /// usable plan.
    async fn refine_plan(
        &self,
        observation: &ObservationPackage,
        reasoning: &ReasoningOutput,
        session: &mut ReasoningSession,
    ) -> Result<Option<Vec<InvestigationStep>>, PerceptixError> {
        let state = &observation.payload;
        let hypotheses: Vec<_> = reasoning.hypotheses.iter().take(3).collect();

        let prompt = format!(
            "You are a data reliability planning agent.\n\
             Create a concrete investigation plan using ONLY allowed tools.\n\n\
             Allowed tools:\n\
             - check_git_diff (args: commit_hash, file)\n\
             - verify_etl_mapping (args: column)\n\
             - monitor_baseline (args: metric)\n\n\
             Hypotheses:\n{}\n\n\
             State signals:\n{}\n\n\
             Return STRICT JSON:\n\
             {{\n  \"investigation_plan\": [\n    \
             {{\"step_id\": 1, \"action\": \"check_git_diff\", \"target\": \"repo\", \
             \"args\": {{\"commit_hash\": \"latest\", \"file\": \"path\"}}}}\n  ]\n}}\n",
            serde_json::to_string_pretty(&hypotheses).unwrap_or_default(),
            serde_json::to_string_pretty(&json!({
                "tables": state.table_metrics.keys().take(10).collect::<Vec<_>>(),
                "pipeline_events": state.pipeline_events.iter().take(5).collect::<Vec<_>>(),
                "recent_code_commits": state.recent_code_commits.iter().take(2).collect::<Vec<_>>(),
            }))
            .unwrap_or_default(),
        );

        let fallback_plan = reasoning.investigation_plan.clone();
        let (payload, _meta) = self
            .runtime
            .generate(session, "plan", &prompt, move || {
                json!({ "investigation_plan": fallback_plan })
            })
            .await?;

        let raw = match payload.get("investigation_plan") {
            Some(Value::Array(items)) if !items.is_empty() => items.clone(),
            _ => return Ok(None),
        };

        let mut plan = Vec::with_capacity(raw.len());
        for item in raw {
            let step: InvestigationStep = serde_json::from_value(item)
                .map_err(|e| PerceptixError::Reasoner(format!("invalid plan step: {}", e)))?;
            step.validate()?;
            plan.push(step);
        }
        Ok(Some(plan))
    }

    /// Propose a draft automation policy for a verified incident. The result
    /// is persisted disabled, for human review.
    pub async fn suggest_policy(
        &self,
        incident: &IncidentReport,
        session: &mut ReasoningSession,
    ) -> Result<(Value, CallMeta), PerceptixError> {
        let prompt = format!(
            "You are a data reliability policy advisor.\n\
             Propose a single automation policy based on the incident, suitable for human review.\n\n\
             Incident summary:\n{}\n\n\
             Return STRICT JSON:\n\
             {{\n  \"name\": \"string\",\n  \"enabled\": true|false,\n  \
             \"match\": {{\"incident_types\": [\"SCHEMA_CHANGE\"], \"min_confidence\": 0-100}},\n  \
             \"action\": {{\"playbook\": \"Playbook Name\", \"require_approval\": true|false}},\n  \
             \"rationale\": \"short justification\"\n}}\n",
            serde_json::to_string_pretty(&json!({
                "incident_type": incident.incident_type.as_str(),
                "confidence": incident.final_confidence_score,
                "root_cause_analysis": truncate(&incident.root_cause_analysis, 600),
                "recommended_actions": incident.recommended_actions.iter().take(5).collect::<Vec<_>>(),
            }))
            .unwrap_or_default(),
        );

        let incident_type = incident.incident_type;
        self.runtime
            .generate(session, "policy_suggest", &prompt, move || {
                json!({
                    "name": format!("Auto-route {} with approval", incident_type.as_str()),
                    "enabled": true,
                    "match": {
                        "incident_types": [incident_type.as_str()],
                        "min_confidence": 85,
                    },
                    "action": {"playbook": "Fix Schema Mismatch", "require_approval": true},
                    "rationale": "Recurring incidents benefit from a consistent approval-gated response.",
                })
            })
            .await
    }

    /// Assess remediation risk for a playbook about to run against an
    /// incident. Advisory: risk can only tighten the approval requirement,
    /// never loosen it.
    pub async fn assess_playbook_risk(
        &self,
        incident: &IncidentReport,
        playbook_name: &str,
        playbook_steps: &Value,
        session: &mut ReasoningSession,
    ) -> Result<(Value, CallMeta), PerceptixError> {
        let prompt = format!(
            "You are a remediation risk assessor.\n\
             Given an incident and a remediation playbook, assess risk.\n\n\
             Incident:\n{}\n\n\
             Playbook:\n{}\n\n\
             Return STRICT JSON:\n\
             {{\n  \"risk_score\": 0-100,\n  \"require_approval\": true|false,\n  \
             \"rationale\": \"short justification\"\n}}\n",
            serde_json::to_string_pretty(&json!({
                "incident_type": incident.incident_type.as_str(),
                "confidence": incident.final_confidence_score,
                "summary": truncate(&incident.root_cause_analysis, 600),
            }))
            .unwrap_or_default(),
            serde_json::to_string_pretty(&json!({
                "name": playbook_name,
                "steps": playbook_steps,
            }))
            .unwrap_or_default(),
        );

        // Deterministic fallback: score by the same destructive-action
        // heuristics the approval gate applies.
        let steps = playbook_steps.clone();
        self.runtime
            .generate(session, "remediation_risk", &prompt, move || {
                let destructive = steps
                    .as_array()
                    .map(|steps| {
                        steps.iter().any(|step| {
                            let action =
                                step.get("action").and_then(Value::as_str).unwrap_or("");
                            let params =
                                step.get("params").cloned().unwrap_or(Value::Null);
                            crate::remediation::ApprovalGate::requires_approval(action, &params)
                        })
                    })
                    .unwrap_or(false);
                json!({
                    "risk_score": if destructive { 85 } else { 25 },
                    "require_approval": destructive,
                    "rationale": if destructive {
                        "Playbook contains destructive or production-scoped steps."
                    } else {
                        "Playbook steps are reversible and low impact."
                    },
                })
            })
            .await
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn parse_reasoning_output(payload: Value) -> Result<ReasoningOutput, PerceptixError> {
    let output: ReasoningOutput = serde_json::from_value(payload)
        .map_err(|e| PerceptixError::Reasoner(format!("malformed reasoning output: {}", e)))?;
    output.validate()?;
    Ok(output)
}

fn analysis_prompt(state: &SystemState) -> Result<String, PerceptixError> {
    let context = serde_json::to_string_pretty(state)
        .map_err(|e| PerceptixError::Reasoner(format!("failed to serialize state: {}", e)))?;
    Ok(format!(
        "SYSTEM ROLE: You are a Senior Principal Site Reliability Engineer (SRE).\n\
         OBJECTIVE: Perform a Root Cause Analysis (RCA) on the provided SYSTEM STATE JSON.\n\n\
         INPUT CONTEXT:\n{}\n\n\
         ANALYSIS INSTRUCTIONS:\n\
         1. Compare 'table_metrics' against 'historical_baseline_7d'. Identify significant drifts (>50% deviation).\n\
         2. Correlate anomalies with 'recent_code_commits'. Look for semantic matches (e.g., variable renames).\n\
         3. Assess business impact using 'dependency_map' and 'sla_definitions'.\n\
         4. Generate 1-3 ranked hypotheses ordered by likelihood.\n\
         5. Create a specific investigation plan with concrete actions.\n\n\
         AVAILABLE TOOLS:\n\
         You may ONLY use the following tools in your investigation plan:\n\
         1. \"check_git_diff\": Checks for code changes. Args: {{\"target\": \"repo\", \"file\": \"path\", \"commit_hash\": \"latest\"}}\n\
         2. \"verify_etl_mapping\": Checks ETL schema config. Args: {{\"target\": \"config_name\", \"column\": \"col_name\"}}\n\
         3. \"monitor_baseline\": Checks metric deviations. Args: {{\"target\": \"table_name\", \"metric\": \"metric_name\"}}\n\n\
         DO NOT invent new tools.\n\n\
         OUTPUT FORMAT REQUIREMENTS (STRICT JSON ONLY):\n\
         Return a JSON object with keys: analysis_summary, detected_anomalies, hypotheses\n\
         (id 'H<n>', description >= 10 chars, supporting_evidence >= 5 chars, confidence_score 0-100),\n\
         investigation_plan (step_id, action, target, args), severity_assessment (\"P0\".. \"P3\").\n",
        context
    ))
}

/// Deterministic triage verdict derived from trigger wording.
fn triage_fallback(triggers: &[String]) -> Value {
    let priority = if triggers.iter().any(|t| t.contains("Critical") || t.contains("P0")) {
        "P0"
    } else if triggers.iter().any(|t| t.contains("High") || t.contains("Major")) {
        "P1"
    } else {
        "P2"
    };
    json!({
        "should_investigate": true,
        "priority": priority,
        "suspected_incident_types": ["DATA_INTEGRITY_FAILURE"],
        "rationale": "Triggers indicate anomalous behavior requiring investigation.",
        "suggested_focus": triggers.iter().take(5).collect::<Vec<_>>(),
    })
}

/// Deterministic root cause analysis used whenever the provider is absent or
/// misbehaving. Keys off the attribution null rate in orders_table.
fn reasoning_fallback(state: &SystemState) -> Value {
    let attribution_null_rate = state
        .table_metrics
        .get("orders_table")
        .and_then(|m| m.null_rates.get("attribution_source"))
        .copied()
        .unwrap_or(0.0);

    if attribution_null_rate > 0.50 {
        json!({
            "analysis_summary": "Critical data quality degradation in orders_table detected immediately following checkout-service-api deployment.",
            "detected_anomalies": [
                format!("orders_table.attribution_source null_rate is {:.2} (expected ~0.05)", attribution_null_rate),
                "Anomaly correlates with recent code commit timestamp",
            ],
            "hypotheses": [
                {
                    "id": "H1",
                    "description": "Schema Mismatch: Upstream checkout-service renamed the tracking field, but the ETL pipeline expects the old name.",
                    "supporting_evidence": "Commit 'refactor: rename tracking_pixel_id to source_id' occurred recently. Null spike is near 100%, indicating complete field mapping failure.",
                    "confidence_score": 95.0,
                },
                {
                    "id": "H2",
                    "description": "Traffic Shift: A new marketing campaign is sending traffic without tracking parameters.",
                    "supporting_evidence": "Marketing_ROI_Report is a dependency. However, 98% drop is too steep for just organic traffic mix.",
                    "confidence_score": 20.0,
                },
            ],
            "investigation_plan": [
                {
                    "step_id": 1,
                    "action": "check_git_diff",
                    "target": "checkout-service-api",
                    "args": {"commit_hash": "latest", "file": "events/tracker.py"},
                },
                {
                    "step_id": 2,
                    "action": "verify_etl_mapping",
                    "target": "warehouse_loader_config",
                    "args": {"column": "attribution_source"},
                },
            ],
            "severity_assessment": "P0",
        })
    } else {
        json!({
            "analysis_summary": "System metrics within normal parameters. No critical anomalies detected.",
            "detected_anomalies": [],
            "hypotheses": [
                {
                    "id": "H1",
                    "description": "No significant issues detected. All metrics within baseline thresholds.",
                    "supporting_evidence": "Attribution null rate is consistent with 7-day average. No recent code changes affecting data pipeline.",
                    "confidence_score": 95.0,
                }
            ],
            "investigation_plan": [
                {
                    "step_id": 1,
                    "action": "monitor_baseline",
                    "target": "orders_table",
                    "args": {"metric": "attribution_source_null_rate"},
                }
            ],
            "severity_assessment": "P3",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perceptix_common::models::{
        HistoricalBaseline, SystemMetadata, TableMetric, Telemetry,
    };
    use std::collections::{BTreeMap, HashMap};

    fn anomalous_state() -> SystemState {
        let mut null_rates = HashMap::new();
        null_rates.insert("attribution_source".to_string(), 0.99);
        null_rates.insert("order_id".to_string(), 0.0);

        let mut table_metrics = BTreeMap::new();
        table_metrics.insert(
            "orders_table".to_string(),
            TableMetric {
                row_count: 45_000,
                freshness_minutes: 30,
                null_rates,
                last_updated: None,
            },
        );

        let mut baselines = BTreeMap::new();
        baselines.insert(
            "orders_table".to_string(),
            HistoricalBaseline {
                avg_daily_rows: 50_000,
                avg_attribution_null_rate: 0.05,
            },
        );

        SystemState {
            metadata: SystemMetadata {
                domain: "ecommerce_analytics".to_string(),
                environment: "production".to_string(),
                timestamp: "2026-08-25T00:00:00Z".to_string(),
            },
            table_metrics,
            dependency_map: BTreeMap::new(),
            historical_baseline_7d: baselines,
            pipeline_events: Vec::new(),
            recent_code_commits: Vec::new(),
            alert_history: Vec::new(),
            sla_definitions: BTreeMap::new(),
        }
    }

    fn observation(state: SystemState) -> ObservationPackage {
        ObservationPackage {
            telemetry: Telemetry {
                trace_id: "trace-test".to_string(),
                latency_ms: 1.0,
                component: "observer".to_string(),
                version: "test".to_string(),
            },
            payload: state,
            ml_predictions: None,
            rules_evaluation: None,
        }
    }

    fn mock_reasoner() -> Reasoner {
        let mut config = PerceptixConfig::default();
        config.system.mode = SystemMode::Mock;
        Reasoner::new(&config)
    }

    #[test]
    fn test_reasoning_fallback_anomalous_is_valid_output() {
        let payload = reasoning_fallback(&anomalous_state());
        let output = parse_reasoning_output(payload).unwrap();
        assert_eq!(output.hypotheses.len(), 2);
        assert_eq!(output.investigation_plan.len(), 2);
        assert_eq!(output.investigation_plan[0].action, "check_git_diff");
    }

    #[test]
    fn test_reasoning_fallback_healthy_is_valid_output() {
        let mut state = anomalous_state();
        state
            .table_metrics
            .get_mut("orders_table")
            .unwrap()
            .null_rates
            .insert("attribution_source".to_string(), 0.05);
        let output = parse_reasoning_output(reasoning_fallback(&state)).unwrap();
        assert_eq!(output.investigation_plan[0].action, "monitor_baseline");
    }

    #[test]
    fn test_triage_fallback_priority_mapping() {
        let critical = triage_fallback(&["Critical Freshness Violation in inventory_table".into()]);
        assert_eq!(critical["priority"], "P0");
        let high = triage_fallback(&["High Null Rate in orders_table.attribution_source".into()]);
        assert_eq!(high["priority"], "P1");
        let plain = triage_fallback(&["Custom Rules Triggered".into()]);
        assert_eq!(plain["priority"], "P2");
    }

    #[tokio::test]
    async fn test_generate_hypotheses_mock_mode() {
        let reasoner = mock_reasoner();
        let mut session = reasoner.new_session("trace-test");
        let result = reasoner
            .generate_hypotheses(&observation(anomalous_state()), &mut session)
            .await
            .unwrap();
        assert_eq!(result.reasoning.hypotheses[0].id, "H1");
        assert_eq!(result.metadata["api_used"], false);
        assert!(!result.reasoning.investigation_plan.is_empty());
    }

    #[tokio::test]
    async fn test_policy_suggestion_fallback_shape() {
        let reasoner = mock_reasoner();
        let mut session = reasoner.new_session("trace-test");
        let report = crate::verifier::tests_support::sample_report();
        let (payload, meta) = reasoner.suggest_policy(&report, &mut session).await.unwrap();
        assert!(!meta.api_used);
        assert!(payload["match"]["incident_types"].is_array());
        assert_eq!(payload["action"]["require_approval"], true);
    }

    #[tokio::test]
    async fn test_risk_fallback_flags_destructive_steps() {
        let reasoner = mock_reasoner();
        let mut session = reasoner.new_session("trace-test");
        let report = crate::verifier::tests_support::sample_report();

        let destructive = json!([
            {"name": "Drop partitions", "action": "drop_partitions", "params": {}}
        ]);
        let (payload, _) = reasoner
            .assess_playbook_risk(&report, "purge", &destructive, &mut session)
            .await
            .unwrap();
        assert_eq!(payload["require_approval"], true);

        let safe = json!([
            {"name": "Note", "action": "log_message", "params": {}}
        ]);
        let (payload, _) = reasoner
            .assess_playbook_risk(&report, "note", &safe, &mut session)
            .await
            .unwrap();
        assert_eq!(payload["require_approval"], false);
    }
}
