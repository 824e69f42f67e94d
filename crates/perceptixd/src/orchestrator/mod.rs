//! The incident lifecycle orchestrator: one `run_cycle` call drives the full
//! observe → triage → reason → investigate → verify → persist → remediate →
//! escalate state machine.
//!
//! Failure semantics per stage:
//! - observation, reasoning, investigation, verification and persistence
//!   failures abort the cycle with a typed error;
//! - triage, policy suggestion, risk assessment, escalation delivery and
//!   meta-learning are advisory: failures are logged and the cycle continues;
//! - individual investigation steps fail into error evidence, never the cycle.

pub mod triggers;

use perceptix_common::{
    DecisionRecord, IncidentReport, ObservationPackage, PerceptixConfig, PerceptixError,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::escalator::{alert_level, Escalator};
use crate::historian::Historian;
use crate::investigator::Investigator;
use crate::meta_learner::MetaLearner;
use crate::metrics::SystemMetrics;
use crate::observer::Observer;
use crate::policy::{PolicyActionDef, PolicyEngine, StoredPolicy};
use crate::reasoner::{CallMeta, Reasoner, ReasoningSession};
use crate::remediation::RemediationEngine;
use crate::verifier::Verifier;

pub struct PerceptixSystem {
    config: PerceptixConfig,
    observer: Arc<dyn Observer>,
    reasoner: Reasoner,
    investigator: Investigator,
    verifier: Verifier,
    historian: Arc<Historian>,
    remediation: RemediationEngine,
    escalator: Escalator,
    meta_learner: Arc<MetaLearner>,
    metrics: SystemMetrics,
    tenant_id: Option<String>,
}

impl PerceptixSystem {
    pub fn new(
        config: PerceptixConfig,
        observer: Arc<dyn Observer>,
        historian: Arc<Historian>,
    ) -> Result<Self, PerceptixError> {
        let reasoner = Reasoner::new(&config);
        let verifier = Verifier::new(&config, reasoner.runtime());
        let investigator = Investigator::new(&config);
        let remediation = RemediationEngine::new(&config, Arc::clone(&historian), None);
        let escalator = Escalator::new(&config.notification, config.system.confidence_threshold);
        let meta_learner = Arc::new(MetaLearner::new(Arc::clone(&historian)));
        let metrics =
            SystemMetrics::new().map_err(|e| PerceptixError::System(e.to_string()))?;

        Ok(Self {
            config,
            observer,
            reasoner,
            investigator,
            verifier,
            historian,
            remediation,
            escalator,
            meta_learner,
            metrics,
            tenant_id: None,
        })
    }

    pub fn metrics(&self) -> &SystemMetrics {
        &self.metrics
    }

    pub fn historian(&self) -> &Arc<Historian> {
        &self.historian
    }

    pub fn remediation(&self) -> &RemediationEngine {
        &self.remediation
    }

    /// Run one full lifecycle cycle. `Ok(None)` means the system looked
    /// healthy (or triage stood the investigation down); `Ok(Some(report))`
    /// means an incident was verified and persisted.
    pub async fn run_cycle(
        &self,
        cycle_id: u64,
    ) -> Result<Option<IncidentReport>, PerceptixError> {
        if cycle_id > self.config.system.max_cycles {
            return Err(PerceptixError::CycleLimitExceeded(format!(
                "cycle {} exceeds configured maximum {}",
                cycle_id, self.config.system.max_cycles
            )));
        }

        let started = Instant::now();
        let result = self.run_cycle_inner(cycle_id).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(Some(report)) => {
                self.metrics.record_cycle(elapsed, "incident", true);
                self.metrics
                    .record_verdict(report.verification_status.as_str());
                self.persist_cycle_metrics(elapsed, Some(report.final_confidence_score), true);
            }
            Ok(None) => {
                self.metrics.record_cycle(elapsed, "healthy", false);
                self.persist_cycle_metrics(elapsed, None, false);
            }
            Err(e) => {
                self.metrics.record_cycle(elapsed, "error", true);
                self.metrics.record_cycle_error(error_stage(e));
                self.persist_cycle_metrics(elapsed, None, true);
            }
        }
        result
    }

    async fn run_cycle_inner(
        &self,
        cycle_id: u64,
    ) -> Result<Option<IncidentReport>, PerceptixError> {
        info!("--- CYCLE {} START ---", cycle_id);

        // Phase 1: observation.
        let observation = self.observe(cycle_id).await?;
        let trace_id = observation.telemetry.trace_id.clone();
        let mut session = self.reasoner.new_session(&trace_id);
        let mut decision_log: Vec<DecisionRecord> = Vec::new();

        let triggers = triggers::evaluate_triggers(&observation);
        if triggers.is_empty() {
            info!("[CYCLE {}] System healthy. Triggers: none", cycle_id);
            return Ok(None);
        }
        warn!(
            "[CYCLE {}] ANOMALY DETECTED: {}. Engaging reasoning pipeline.",
            cycle_id,
            triggers.join(", ")
        );

        // Phase 1.5: triage, advisory.
        if let Some(stand_down) = self
            .triage(cycle_id, &triggers, &observation, &mut session, &mut decision_log)
            .await
        {
            return Ok(stand_down);
        }

        // Phase 2: reasoning.
        info!("[CYCLE {}] Phase 2: Reasoning", cycle_id);
        let stage_start = Instant::now();
        let analysis = match self
            .reasoner
            .generate_hypotheses(&observation, &mut session)
            .await
        {
            Ok(analysis) => {
                self.metrics
                    .record_stage("reason", stage_start.elapsed().as_secs_f64(), true);
                analysis
            }
            Err(e) => {
                self.metrics
                    .record_stage("reason", stage_start.elapsed().as_secs_f64(), false);
                return Err(e);
            }
        };

        decision_log.push(
            DecisionRecord::new("reason", &analysis.reasoning.analysis_summary)
                .with_data(json!({
                    "severity": analysis.reasoning.severity_assessment,
                    "hypotheses_count": analysis.reasoning.hypotheses.len(),
                }))
                .with_meta(analysis.metadata.clone()),
        );

        let primary = match analysis.reasoning.hypotheses.first() {
            Some(h) => h.clone(),
            None => {
                warn!("[CYCLE {}] No hypotheses generated", cycle_id);
                return Ok(None);
            }
        };
        info!(
            "[CYCLE {}] Primary hypothesis: {} (confidence: {:.1}%)",
            cycle_id, primary.id, primary.confidence_score
        );

        // Phase 3: investigation.
        info!("[CYCLE {}] Phase 3: Investigation", cycle_id);
        let stage_start = Instant::now();
        let evidence_chain = match self
            .investigator
            .execute_plan(&analysis.reasoning.investigation_plan)
            .await
        {
            Ok(evidence) => {
                self.metrics
                    .record_stage("investigate", stage_start.elapsed().as_secs_f64(), true);
                evidence
            }
            Err(e) => {
                self.metrics
                    .record_stage("investigate", stage_start.elapsed().as_secs_f64(), false);
                return Err(e);
            }
        };
        info!(
            "[CYCLE {}] Evidence collected: {} items",
            cycle_id,
            evidence_chain.len()
        );

        // Phase 4: verification.
        info!("[CYCLE {}] Phase 4: Verification", cycle_id);
        let stage_start = Instant::now();
        let verify_result = self
            .verifier
            .verify_incident(
                &primary,
                &evidence_chain,
                &analysis.reasoning.detected_anomalies,
                cycle_id,
                decision_log,
                &mut session,
            )
            .await;
        self.metrics.record_stage(
            "verify",
            stage_start.elapsed().as_secs_f64(),
            verify_result.is_ok(),
        );
        let mut report = verify_result?;
        // The report carries the high-level signals that opened the cycle.
        report.trigger_signals = triggers.clone();
        info!(
            "[CYCLE {}] Verification complete: status={}, confidence={:.1}%",
            cycle_id,
            report.verification_status.as_str(),
            report.final_confidence_score
        );

        // Phase 5: persistence. The one fatal I/O stage.
        info!("[CYCLE {}] Phase 5: Persistence", cycle_id);
        self.historian
            .save_incident(&report, self.tenant_id.as_deref())
            .map_err(|e| PerceptixError::Historian(e.to_string()))?;

        // Phase 5.5: policy suggestion, advisory. The record lands in the
        // in-memory report only; the persisted row already has the verified
        // decision log.
        match self.reasoner.suggest_policy(&report, &mut session).await {
            Ok((payload, meta)) => {
                self.record_llm(&meta);
                self.persist_policy_suggestion(cycle_id, &report, &payload);
                report.decision_log.push(
                    DecisionRecord::new(
                        "policy_suggest",
                        payload["rationale"].as_str().unwrap_or(""),
                    )
                    .with_data(json!({ "suggested_policy": payload }))
                    .with_meta(meta.to_value()),
                );
            }
            Err(e) => warn!(
                "[CYCLE {}] Policy suggestion failed (non-fatal): {}",
                cycle_id, e
            ),
        }

        let actionable =
            report.final_confidence_score >= self.config.system.confidence_threshold;

        // Phase 6: remediation.
        if actionable {
            info!("[CYCLE {}] Phase 6: Remediation", cycle_id);
            self.remediate(cycle_id, &mut report, &evidence_chain, &mut session)
                .await;
        }

        // Phase 7: escalation.
        if actionable {
            info!("[CYCLE {}] Phase 7: Escalation", cycle_id);
            let deliveries = self.escalator.escalate(&report).await;
            let level = alert_level(&report, self.config.system.confidence_threshold);
            for _ in deliveries.values().filter(|ok| **ok) {
                self.metrics.record_alert(level.as_str());
            }
        } else {
            info!(
                "[CYCLE {}] Confidence below threshold. No alert sent.",
                cycle_id
            );
        }

        info!("--- CYCLE {} COMPLETE ---", cycle_id);

        // Phase 8: periodic meta-learning, fire-and-forget.
        let interval = self.config.system.meta_learning_interval.max(1);
        if cycle_id % interval == 0 {
            info!("[CYCLE {}] Phase 8: Meta-learning pattern analysis", cycle_id);
            let learner = Arc::clone(&self.meta_learner);
            tokio::task::spawn_blocking(move || {
                if let Err(e) = learner.analyze_patterns() {
                    warn!("Meta-learning analysis failed (non-fatal): {}", e);
                }
            });
        }

        Ok(Some(report))
    }

    async fn observe(&self, cycle_id: u64) -> Result<ObservationPackage, PerceptixError> {
        info!("[CYCLE {}] Phase 1: Observation", cycle_id);
        let stage_start = Instant::now();
        let observer = Arc::clone(&self.observer);
        let result = tokio::task::spawn_blocking(move || observer.observe())
            .await
            .map_err(|e| PerceptixError::Observer(format!("observer task panicked: {}", e)))?;
        self.metrics.record_stage(
            "observe",
            stage_start.elapsed().as_secs_f64(),
            result.is_ok(),
        );
        result
    }

    /// Returns `Some(None)` when triage stands the cycle down.
    async fn triage(
        &self,
        cycle_id: u64,
        triggers: &[String],
        observation: &ObservationPackage,
        session: &mut ReasoningSession,
        decision_log: &mut Vec<DecisionRecord>,
    ) -> Option<Option<IncidentReport>> {
        match self.reasoner.triage(triggers, observation, session).await {
            Ok((payload, meta)) => {
                self.record_llm(&meta);
                let should_investigate =
                    payload["should_investigate"].as_bool().unwrap_or(true);
                decision_log.push(
                    DecisionRecord::new("triage", payload["rationale"].as_str().unwrap_or(""))
                        .with_data(json!({
                            "should_investigate": should_investigate,
                            "priority": payload["priority"],
                            "suspected_incident_types": payload["suspected_incident_types"],
                        }))
                        .with_meta(meta.to_value()),
                );
                if !should_investigate {
                    info!("[CYCLE {}] Triage decided to skip investigation.", cycle_id);
                    return Some(None);
                }
            }
            Err(e) => warn!(
                "[CYCLE {}] Triage failed, continuing without triage gating: {}",
                cycle_id, e
            ),
        }
        None
    }

    async fn remediate(
        &self,
        cycle_id: u64,
        report: &mut IncidentReport,
        evidence_chain: &[perceptix_common::EvidenceItem],
        session: &mut ReasoningSession,
    ) {
        let mut context = HashMap::new();
        context.insert(
            "evidence".to_string(),
            serde_json::to_string(evidence_chain).unwrap_or_default(),
        );
        let dry_run = self.config.remediation.dry_run;

        let policies = match self.historian.list_policies(true) {
            Ok(policies) => policies,
            Err(e) => {
                warn!("[CYCLE {}] Failed to load policies: {}", cycle_id, e);
                Vec::new()
            }
        };
        let policy_actions = PolicyEngine::evaluate(&policies, report);

        if policy_actions.is_empty() {
            // Backward-compatible path: match playbooks by incident trigger.
            let matched = self
                .remediation
                .can_remediate(report.incident_type.as_str(), report.final_confidence_score)
                .map(|p| (p.name.clone(), serde_json::to_value(&p.steps).unwrap_or_default()));

            let result = if let Some((name, steps)) = matched {
                let force_approval = self
                    .assess_risk(cycle_id, report, &name, &steps, session, true)
                    .await;
                self.remediation
                    .execute_playbook_for_incident(
                        &report.report_id,
                        &name,
                        report.incident_type.as_str(),
                        report.final_confidence_score,
                        context,
                        dry_run,
                        force_approval,
                    )
                    .await
            } else {
                self.remediation
                    .execute_remediation(
                        &report.report_id,
                        report.incident_type.as_str(),
                        report.final_confidence_score,
                        context,
                        dry_run,
                    )
                    .await
            };
            info!("[CYCLE {}] Remediation result: {}", cycle_id, result.message);
            self.metrics.record_remediation(remediation_outcome(&result));
            return;
        }

        for action in policy_actions {
            if let Err(e) = self.historian.record_audit_event(
                "system",
                "policy.matched",
                "policy",
                &action.policy_id,
                &json!({
                    "incident_id": report.report_id,
                    "incident_type": report.incident_type.as_str(),
                    "playbook": action.playbook,
                    "require_approval": action.require_approval,
                }),
            ) {
                warn!("[CYCLE {}] Audit write failed: {}", cycle_id, e);
            }

            let mut force_approval = action.require_approval;
            if let Some(playbook) = self.remediation.playbook(&action.playbook) {
                let steps = serde_json::to_value(&playbook.steps).unwrap_or_default();
                if self
                    .assess_risk(cycle_id, report, &action.playbook, &steps, session, true)
                    .await
                {
                    force_approval = true;
                }
            }

            let result = self
                .remediation
                .execute_playbook_for_incident(
                    &report.report_id,
                    &action.playbook,
                    report.incident_type.as_str(),
                    report.final_confidence_score,
                    context.clone(),
                    dry_run,
                    force_approval,
                )
                .await;
            info!(
                "[CYCLE {}] Policy remediation result: {}",
                cycle_id, result.message
            );
            self.metrics.record_remediation(remediation_outcome(&result));
        }
    }

    /// Risk assessment can only tighten the approval requirement, never relax
    /// it. Returns true when approval should be forced.
    async fn assess_risk(
        &self,
        cycle_id: u64,
        report: &mut IncidentReport,
        playbook_name: &str,
        steps: &serde_json::Value,
        session: &mut ReasoningSession,
        record_decision: bool,
    ) -> bool {
        match self
            .reasoner
            .assess_playbook_risk(report, playbook_name, steps, session)
            .await
        {
            Ok((payload, meta)) => {
                self.record_llm(&meta);
                let require = payload["require_approval"].as_bool().unwrap_or(false)
                    || payload["risk_score"].as_f64().unwrap_or(0.0) >= 70.0;
                if record_decision {
                    report.decision_log.push(
                        DecisionRecord::new(
                            "remediation_risk",
                            payload["rationale"].as_str().unwrap_or(""),
                        )
                        .with_data(json!({ "playbook": playbook_name, "risk": payload }))
                        .with_meta(meta.to_value()),
                    );
                }
                require
            }
            Err(e) => {
                warn!(
                    "[CYCLE {}] Remediation risk assessment failed (non-fatal): {}",
                    cycle_id, e
                );
                // Unknown risk is treated as high risk: keep the human in
                // the loop when the assessment cannot run.
                true
            }
        }
    }

    /// Store a suggested policy disabled, keyed to the incident that prompted
    /// it, so an operator can review and enable it later.
    fn persist_policy_suggestion(
        &self,
        cycle_id: u64,
        report: &IncidentReport,
        payload: &serde_json::Value,
    ) {
        let action: PolicyActionDef = match serde_json::from_value(payload["action"].clone()) {
            Ok(action) => action,
            Err(e) => {
                warn!(
                    "[CYCLE {}] Policy suggestion payload unusable, not stored: {}",
                    cycle_id, e
                );
                return;
            }
        };
        let suggestion = StoredPolicy {
            id: format!("suggested-{}", report.report_id),
            name: payload["name"]
                .as_str()
                .unwrap_or("suggested policy")
                .to_string(),
            enabled: false,
            matcher: serde_json::from_value(payload["match"].clone()).unwrap_or_default(),
            action,
            rationale: payload["rationale"].as_str().map(str::to_string),
        };
        if let Err(e) = self.historian.upsert_policy(&suggestion) {
            warn!(
                "[CYCLE {}] Failed to store policy suggestion: {}",
                cycle_id, e
            );
        }
    }

    fn record_llm(&self, meta: &CallMeta) {
        self.metrics
            .record_llm_call(&meta.stage, meta.api_used, meta.cache_hit);
    }

    fn persist_cycle_metrics(&self, elapsed_secs: f64, confidence: Option<f64>, anomaly: bool) {
        let write = |name: &str, value: f64| {
            if let Err(e) = self.historian.save_metric(name, value) {
                warn!("Failed to persist cycle metric {}: {}", name, e);
            }
        };
        write("cycle_duration_ms", elapsed_secs * 1000.0);
        if let Some(confidence) = confidence {
            write("confidence", confidence);
        }
        if anomaly {
            write("anomalies_detected", 1.0);
        }
    }
}

fn error_stage(error: &PerceptixError) -> &'static str {
    match error {
        PerceptixError::Observer(_) => "observe",
        PerceptixError::Reasoner(_) | PerceptixError::Budget(_) => "reason",
        PerceptixError::Investigator(_) => "investigate",
        PerceptixError::Verifier(_) | PerceptixError::InsufficientEvidence(_) => "verify",
        PerceptixError::Historian(_) => "persistence",
        _ => "cycle",
    }
}

fn remediation_outcome(result: &crate::remediation::RemediationResult) -> &'static str {
    if result.approval_required {
        "approval_pending"
    } else if result.success {
        "success"
    } else if result.execution.is_some() {
        "failed"
    } else {
        "no_playbook"
    }
}
