//! Automated remediation: playbook routing, approval workflow, rollback.
//!
//! The engine matches confirmed incidents to playbooks (by trigger or by
//! policy routing), gates high-risk playbooks behind human approval, and
//! persists every approval and execution through the historian. Approving a
//! pending token executes the playbook immediately and records the outcome
//! against the token.

pub mod actions;
pub mod approval;
pub mod executor;

pub use actions::{ActionRegistry, ActionResult, ActionStatus, RemediationAction};
pub use approval::{ApprovalGate, ApprovalStatus, ApprovalToken};
pub use executor::{Playbook, PlaybookExecution, PlaybookExecutor, PlaybookStep};

use crate::historian::{ApprovalRecord, Historian};
use chrono::Utc;
use perceptix_common::PerceptixConfig;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// Result of one remediation attempt.
#[derive(Debug, Clone)]
pub struct RemediationResult {
    pub success: bool,
    pub incident_id: String,
    pub playbook_name: String,
    pub execution: Option<PlaybookExecution>,
    pub approval_required: bool,
    pub approval_status: Option<ApprovalStatus>,
    pub approval_token: Option<String>,
    pub message: String,
}

impl RemediationResult {
    fn failure(incident_id: &str, playbook_name: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            incident_id: incident_id.to_string(),
            playbook_name: playbook_name.to_string(),
            execution: None,
            approval_required: false,
            approval_status: None,
            approval_token: None,
            message: message.into(),
        }
    }
}

pub struct RemediationEngine {
    config: PerceptixConfig,
    historian: Arc<Historian>,
    executor: PlaybookExecutor,
    approval_gate: ApprovalGate,
    registry: Arc<ActionRegistry>,
    tenant_id: Option<String>,
}

impl RemediationEngine {
    pub fn new(
        config: &PerceptixConfig,
        historian: Arc<Historian>,
        tenant_id: Option<String>,
    ) -> Self {
        let registry = Arc::new(ActionRegistry::with_builtin_actions());
        let mut executor = PlaybookExecutor::new(Arc::clone(&registry));
        let count = executor.load_playbooks_from_directory(&config.remediation.playbook_dir);
        info!("Loaded {} playbooks", count);

        Self {
            config: config.clone(),
            historian,
            executor,
            approval_gate: ApprovalGate::new(config.remediation.approval_timeout_minutes),
            registry,
            tenant_id,
        }
    }

    pub fn executor_mut(&mut self) -> &mut PlaybookExecutor {
        &mut self.executor
    }

    pub fn approval_gate(&self) -> &ApprovalGate {
        &self.approval_gate
    }

    pub fn playbook(&self, name: &str) -> Option<&Playbook> {
        self.executor.get_playbook(name)
    }

    pub fn playbook_names(&self) -> Vec<String> {
        self.executor.list_playbooks()
    }

    /// First playbook whose trigger matches the incident, if any.
    pub fn can_remediate(&self, incident_type: &str, confidence: f64) -> Option<&Playbook> {
        match self.executor.find_matching(incident_type, confidence) {
            Some(playbook) => {
                info!("Found matching playbook: {}", playbook.name);
                Some(playbook)
            }
            None => {
                info!("No playbook matches incident: {}", incident_type);
                None
            }
        }
    }

    /// Trigger-based remediation: find a matching playbook and run it.
    pub async fn execute_remediation(
        &self,
        incident_id: &str,
        incident_type: &str,
        confidence: f64,
        context: HashMap<String, String>,
        dry_run: bool,
    ) -> RemediationResult {
        info!(
            "Attempting remediation for incident {} ({})",
            incident_id, incident_type
        );
        let playbook = match self.can_remediate(incident_type, confidence) {
            Some(p) => p.clone(),
            None => {
                return RemediationResult::failure(
                    incident_id,
                    "",
                    format!("No playbook found for incident type: {}", incident_type),
                )
            }
        };
        self.run_playbook(&playbook, incident_id, incident_type, confidence, context, dry_run, false)
            .await
    }

    /// Policy-driven routing: run a specific playbook by name.
    /// `force_approval` tightens the gate regardless of the risk heuristics.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_playbook_for_incident(
        &self,
        incident_id: &str,
        playbook_name: &str,
        incident_type: &str,
        confidence: f64,
        context: HashMap<String, String>,
        dry_run: bool,
        force_approval: bool,
    ) -> RemediationResult {
        let playbook = match self.executor.get_playbook(playbook_name) {
            Some(p) => p.clone(),
            None => {
                return RemediationResult::failure(
                    incident_id,
                    playbook_name,
                    format!("Playbook not found: {}", playbook_name),
                )
            }
        };
        self.run_playbook(
            &playbook,
            incident_id,
            incident_type,
            confidence,
            context,
            dry_run,
            force_approval,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_playbook(
        &self,
        playbook: &Playbook,
        incident_id: &str,
        incident_type: &str,
        confidence: f64,
        mut context: HashMap<String, String>,
        dry_run: bool,
        force_approval: bool,
    ) -> RemediationResult {
        context.insert("incident_id".to_string(), incident_id.to_string());
        context.insert("incident_type".to_string(), incident_type.to_string());
        context.insert("confidence".to_string(), format!("{:.1}", confidence));
        context.insert("timestamp".to_string(), Utc::now().to_rfc3339());

        if !PlaybookExecutor::check_conditions(playbook, &context) {
            return RemediationResult::failure(
                incident_id,
                &playbook.name,
                "Playbook conditions not met",
            );
        }

        let requires_approval = force_approval || self.playbook_requires_approval(playbook);
        if requires_approval && !dry_run {
            let token = self.approval_gate.request_approval(
                &playbook.name,
                json!({
                    "incident_id": incident_id,
                    "incident_type": incident_type,
                    "confidence": confidence,
                    "playbook": playbook.name,
                    "forced": force_approval,
                }),
            );
            self.persist_approval(&token, incident_id, &playbook.name, &context);

            return RemediationResult {
                success: false,
                incident_id: incident_id.to_string(),
                playbook_name: playbook.name.clone(),
                execution: None,
                approval_required: true,
                approval_status: Some(ApprovalStatus::Pending),
                approval_token: Some(token.token_id),
                message: "Approval required".to_string(),
            };
        }

        let started_at = Utc::now().to_rfc3339();
        let execution = self.executor.execute_playbook(playbook, &context, dry_run).await;
        let finished_at = Utc::now().to_rfc3339();

        if !dry_run {
            if let Err(e) = self.historian.record_remediation_execution(
                self.tenant_id.as_deref(),
                incident_id,
                &playbook.name,
                execution.success,
                &started_at,
                &finished_at,
                &execution,
            ) {
                error!("Failed to persist remediation execution: {}", e);
            }
        }

        RemediationResult {
            success: execution.success,
            incident_id: incident_id.to_string(),
            playbook_name: playbook.name.clone(),
            message: if execution.success {
                "Remediation succeeded".to_string()
            } else {
                "Remediation failed".to_string()
            },
            execution: Some(execution),
            approval_required: false,
            approval_status: None,
            approval_token: None,
        }
    }

    fn playbook_requires_approval(&self, playbook: &Playbook) -> bool {
        playbook
            .steps
            .iter()
            .any(|step| ApprovalGate::requires_approval(&step.action, &step.params))
    }

    fn persist_approval(
        &self,
        token: &ApprovalToken,
        incident_id: &str,
        playbook_name: &str,
        context: &HashMap<String, String>,
    ) {
        let record = ApprovalRecord {
            token_id: token.token_id.clone(),
            tenant_id: self.tenant_id.clone(),
            incident_id: incident_id.to_string(),
            playbook_name: playbook_name.to_string(),
            status: "pending".to_string(),
            requested_at: token.requested_at.to_rfc3339(),
            expires_at: token.expires_at.to_rfc3339(),
            requested_by: "system".to_string(),
            approved_by: None,
            comment: None,
            context: context.clone(),
            details: token.details.clone(),
        };
        if let Err(e) = self.historian.create_remediation_approval(&record) {
            error!("Failed to persist approval request: {}", e);
        }
    }

    /// Approve a pending remediation and execute its playbook immediately.
    /// Returns true when the playbook ran and succeeded.
    pub async fn approve_remediation(
        &self,
        token_id: &str,
        approver: &str,
        comment: Option<&str>,
    ) -> bool {
        let approval = match self.historian.get_remediation_approval(token_id) {
            Ok(Some(a)) => a,
            Ok(None) => {
                error!("Approval token not found: {}", token_id);
                return false;
            }
            Err(e) => {
                error!("Failed to load approval {}: {}", token_id, e);
                return false;
            }
        };
        if approval.status != "pending" {
            error!("Token not pending: {} (status: {})", token_id, approval.status);
            return false;
        }
        let expired = chrono::DateTime::parse_from_rfc3339(&approval.expires_at)
            .map(|deadline| Utc::now() > deadline.with_timezone(&Utc))
            .unwrap_or(false);
        if expired {
            let _ = self.historian.update_remediation_approval_status(
                token_id,
                "expired",
                None,
                None,
            );
            error!("Token expired: {}", token_id);
            return false;
        }

        // Mirror the in-memory gate when the token originated here.
        self.approval_gate.approve(token_id, approver, comment);
        let _ = self.historian.update_remediation_approval_status(
            token_id,
            "approved",
            Some(approver),
            comment,
        );

        let playbook = match self.executor.get_playbook(&approval.playbook_name) {
            Some(p) => p.clone(),
            None => {
                let _ = self.historian.update_remediation_approval_status(
                    token_id,
                    "failed",
                    Some(approver),
                    Some("playbook_not_found"),
                );
                return false;
            }
        };

        let started_at = Utc::now().to_rfc3339();
        let execution = self
            .executor
            .execute_playbook(&playbook, &approval.context, false)
            .await;
        let finished_at = Utc::now().to_rfc3339();

        if let Err(e) = self.historian.record_remediation_execution(
            self.tenant_id.as_deref(),
            &approval.incident_id,
            &approval.playbook_name,
            execution.success,
            &started_at,
            &finished_at,
            &execution,
        ) {
            error!("Failed to persist remediation execution: {}", e);
        }

        let final_status = if execution.success { "executed" } else { "failed" };
        let _ = self.historian.update_remediation_approval_status(
            token_id,
            final_status,
            Some(approver),
            comment,
        );
        execution.success
    }

    pub fn reject_remediation(&self, token_id: &str, rejector: &str, reason: Option<&str>) -> bool {
        let approval = match self.historian.get_remediation_approval(token_id) {
            Ok(Some(a)) => a,
            _ => return false,
        };
        if approval.status != "pending" {
            return false;
        }
        self.approval_gate.reject(token_id, rejector, reason);
        self.historian
            .update_remediation_approval_status(token_id, "rejected", Some(rejector), reason)
            .unwrap_or(false)
    }

    pub fn pending_approvals(&self) -> Vec<ApprovalRecord> {
        self.historian.list_pending_approvals().unwrap_or_default()
    }

    /// Replay a playbook's declarative rollback steps.
    pub async fn rollback_remediation(
        &self,
        incident_id: &str,
        playbook_name: &str,
    ) -> RemediationResult {
        info!("Rolling back remediation for incident {}", incident_id);
        let playbook = match self.executor.get_playbook(playbook_name) {
            Some(p) => p.clone(),
            None => {
                return RemediationResult::failure(
                    incident_id,
                    playbook_name,
                    format!("Playbook not found: {}", playbook_name),
                )
            }
        };
        if playbook.rollback.is_empty() {
            return RemediationResult::failure(
                incident_id,
                playbook_name,
                "Playbook has no rollback steps defined",
            );
        }

        let rollback_playbook = Playbook {
            name: format!("{}_rollback", playbook.name),
            description: format!("Rollback for {}", playbook.name),
            triggers: Vec::new(),
            conditions: Vec::new(),
            steps: playbook.rollback.clone(),
            rollback: Vec::new(),
        };

        let mut context = HashMap::new();
        context.insert("incident_id".to_string(), incident_id.to_string());
        let execution = self
            .executor
            .execute_playbook(&rollback_playbook, &context, false)
            .await;

        RemediationResult {
            success: execution.success,
            incident_id: incident_id.to_string(),
            playbook_name: playbook_name.to_string(),
            message: if execution.success {
                "Rollback succeeded".to_string()
            } else {
                "Rollback failed".to_string()
            },
            execution: Some(execution),
            approval_required: false,
            approval_status: None,
            approval_token: None,
        }
    }

    pub fn status(&self) -> Value {
        json!({
            "playbooks_loaded": self.executor.list_playbooks().len(),
            "actions_registered": self.registry.list().len(),
            "pending_approvals": self.pending_approvals().len(),
            "dry_run": self.config.remediation.dry_run,
            "status": "operational",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAFE_PLAYBOOK: &str = r#"
name: "Log And Notify"
triggers:
  - incident_type: "SCHEMA_CHANGE"
    confidence_threshold: 90
steps:
  - name: "Note incident"
    action: "log_message"
    params:
      message: "incident {{incident_id}} confirmed"
"#;

    const RISKY_PLAYBOOK: &str = r#"
name: "Drop Stale Partitions"
triggers:
  - incident_type: "DATA_INTEGRITY_FAILURE"
    confidence_threshold: 90
steps:
  - name: "Drop partitions"
    action: "drop_partitions"
    params:
      table: "inventory_table"
rollback:
  - name: "Announce rollback"
    action: "log_message"
    params:
      message: "rollback executed"
"#;

    fn engine_with_playbooks() -> (RemediationEngine, TempDir) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("safe.yaml"), SAFE_PLAYBOOK).unwrap();
        std::fs::write(dir.path().join("risky.yaml"), RISKY_PLAYBOOK).unwrap();
        let mut config = PerceptixConfig::default();
        config.remediation.playbook_dir = dir.path().to_path_buf();
        let historian = Arc::new(Historian::open_in_memory().unwrap());
        (RemediationEngine::new(&config, historian, None), dir)
    }

    #[test]
    fn test_can_remediate_respects_confidence() {
        let (engine, _dir) = engine_with_playbooks();
        assert!(engine.can_remediate("SCHEMA_CHANGE", 95.0).is_some());
        assert!(engine.can_remediate("SCHEMA_CHANGE", 80.0).is_none());
        assert!(engine.can_remediate("UPSTREAM_DELAY", 99.0).is_none());
    }

    #[tokio::test]
    async fn test_safe_playbook_executes_without_approval() {
        let (engine, _dir) = engine_with_playbooks();
        let result = engine
            .execute_remediation("inc-1", "SCHEMA_CHANGE", 95.0, HashMap::new(), false)
            .await;
        assert!(result.success);
        assert!(!result.approval_required);
        assert_eq!(result.execution.unwrap().steps_executed, 1);
    }

    #[tokio::test]
    async fn test_risky_playbook_is_gated_behind_approval() {
        let (engine, _dir) = engine_with_playbooks();
        let result = engine
            .execute_remediation("inc-2", "DATA_INTEGRITY_FAILURE", 95.0, HashMap::new(), false)
            .await;
        assert!(!result.success);
        assert!(result.approval_required);
        assert_eq!(result.approval_status, Some(ApprovalStatus::Pending));
        assert!(result.approval_token.is_some());
        // Persisted for operators to act on.
        assert_eq!(engine.pending_approvals().len(), 1);
    }

    #[tokio::test]
    async fn test_force_approval_gates_even_safe_playbooks() {
        let (engine, _dir) = engine_with_playbooks();
        let result = engine
            .execute_playbook_for_incident(
                "inc-3",
                "Log And Notify",
                "SCHEMA_CHANGE",
                95.0,
                HashMap::new(),
                false,
                true,
            )
            .await;
        assert!(result.approval_required);
    }

    #[tokio::test]
    async fn test_approve_executes_and_records_outcome() {
        let (engine, _dir) = engine_with_playbooks();
        let gated = engine
            .execute_playbook_for_incident(
                "inc-4",
                "Log And Notify",
                "SCHEMA_CHANGE",
                95.0,
                HashMap::new(),
                false,
                true,
            )
            .await;
        let token_id = gated.approval_token.unwrap();

        assert!(engine.approve_remediation(&token_id, "oncall", Some("go")).await);
        // Token left pending exactly once; a second approval is refused.
        assert!(!engine.approve_remediation(&token_id, "oncall", None).await);
        assert!(engine.pending_approvals().is_empty());
    }

    #[tokio::test]
    async fn test_reject_pending_approval() {
        let (engine, _dir) = engine_with_playbooks();
        let gated = engine
            .execute_remediation("inc-5", "DATA_INTEGRITY_FAILURE", 95.0, HashMap::new(), false)
            .await;
        let token_id = gated.approval_token.unwrap();
        assert!(engine.reject_remediation(&token_id, "oncall", Some("too risky")));
        assert!(!engine.reject_remediation(&token_id, "oncall", None));
    }

    #[tokio::test]
    async fn test_rollback_requires_declared_steps() {
        let (engine, _dir) = engine_with_playbooks();
        let no_rollback = engine.rollback_remediation("inc-6", "Log And Notify").await;
        assert!(!no_rollback.success);
        assert!(no_rollback.message.contains("no rollback steps"));

        let with_rollback = engine
            .rollback_remediation("inc-6", "Drop Stale Partitions")
            .await;
        assert!(with_rollback.success);
    }

    #[tokio::test]
    async fn test_dry_run_skips_approval_and_side_effects() {
        let (engine, _dir) = engine_with_playbooks();
        let result = engine
            .execute_remediation("inc-7", "DATA_INTEGRITY_FAILURE", 95.0, HashMap::new(), true)
            .await;
        assert!(result.success);
        assert!(!result.approval_required);
        assert!(engine.pending_approvals().is_empty());
    }
}
