//! Playbook loading and step-by-step execution.
//!
//! Playbooks are YAML documents with triggers (incident type + confidence
//! floor), optional preconditions, forward steps and declarative rollback
//! steps. Execution stops at the first failed step and replays captured
//! rollback data in reverse order of capture. Dry runs simulate every step
//! and never roll back.

use crate::remediation::actions::{ActionRegistry, ActionResult, ActionStatus};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookStep {
    #[serde(default = "default_step_name")]
    pub name: String,
    pub action: String,
    #[serde(default)]
    pub params: Value,
}

fn default_step_name() -> String {
    "Unnamed Step".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybookTrigger {
    #[serde(default)]
    pub incident_type: String,
    #[serde(default)]
    pub confidence_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookCondition {
    pub check: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    #[serde(default = "default_playbook_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub triggers: Vec<PlaybookTrigger>,
    #[serde(default)]
    pub conditions: Vec<PlaybookCondition>,
    #[serde(default)]
    pub steps: Vec<PlaybookStep>,
    #[serde(default)]
    pub rollback: Vec<PlaybookStep>,
}

fn default_playbook_name() -> String {
    "Unnamed Playbook".to_string()
}

/// Result of one playbook run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookExecution {
    pub playbook_name: String,
    pub success: bool,
    pub steps_executed: usize,
    pub steps_failed: usize,
    pub execution_time_ms: f64,
    pub step_results: Vec<ActionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub rollback_executed: bool,
}

pub struct PlaybookExecutor {
    registry: Arc<ActionRegistry>,
    playbooks: HashMap<String, Playbook>,
}

impl PlaybookExecutor {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            playbooks: HashMap::new(),
        }
    }

    /// Load one playbook file, registering it under its declared name.
    pub fn load_playbook(&mut self, path: &Path) -> Option<&Playbook> {
        let raw = match std::fs::read_to_string(path) {
            Ok(r) => r,
            Err(e) => {
                error!("Failed to load playbook {}: {}", path.display(), e);
                return None;
            }
        };
        let playbook: Playbook = match serde_yaml::from_str(&raw) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to parse playbook {}: {}", path.display(), e);
                return None;
            }
        };
        info!(
            "Loaded playbook: {} ({} steps)",
            playbook.name,
            playbook.steps.len()
        );
        let name = playbook.name.clone();
        self.playbooks.insert(name.clone(), playbook);
        self.playbooks.get(&name)
    }

    /// Load every *.yaml / *.yml in a directory. Missing directory is not an
    /// error; it just loads nothing.
    pub fn load_playbooks_from_directory(&mut self, directory: &Path) -> usize {
        let entries = match std::fs::read_dir(directory) {
            Ok(e) => e,
            Err(_) => {
                warn!("Playbook directory not found: {}", directory.display());
                return 0;
            }
        };
        let mut count = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if (ext == "yaml" || ext == "yml") && self.load_playbook(&path).is_some() {
                count += 1;
            }
        }
        info!("Loaded {} playbooks from {}", count, directory.display());
        count
    }

    pub fn get_playbook(&self, name: &str) -> Option<&Playbook> {
        self.playbooks.get(name)
    }

    pub fn list_playbooks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.playbooks.keys().cloned().collect();
        names.sort();
        names
    }

    /// First playbook whose trigger matches the incident.
    pub fn find_matching(&self, incident_type: &str, confidence: f64) -> Option<&Playbook> {
        let mut names = self.list_playbooks();
        names.sort();
        names
            .iter()
            .filter_map(|n| self.playbooks.get(n))
            .find(|p| Self::matches_trigger(p, incident_type, confidence))
    }

    pub fn matches_trigger(playbook: &Playbook, incident_type: &str, confidence: f64) -> bool {
        playbook.triggers.iter().any(|t| {
            t.incident_type.eq_ignore_ascii_case(incident_type)
                && confidence >= t.confidence_threshold
        })
    }

    /// Precondition check. Known checks pass; unknown checks warn and pass.
    pub fn check_conditions(playbook: &Playbook, _context: &HashMap<String, String>) -> bool {
        for condition in &playbook.conditions {
            match condition.check.as_str() {
                "git_diff_available" | "etl_config_editable" => {}
                other => warn!("Unknown condition: {}", other),
            }
        }
        true
    }

    /// Execute a playbook. Steps run sequentially on the blocking pool.
    pub async fn execute_playbook(
        &self,
        playbook: &Playbook,
        context: &HashMap<String, String>,
        dry_run: bool,
    ) -> PlaybookExecution {
        let started = Instant::now();
        info!("Executing playbook: {} (dry_run={})", playbook.name, dry_run);

        let mut step_results: Vec<ActionResult> = Vec::new();
        let mut rollback_stack: Vec<(String, Value)> = Vec::new();
        let mut steps_executed = 0;
        let mut steps_failed = 0;
        let mut rollback_executed = false;

        for (i, step) in playbook.steps.iter().enumerate() {
            info!("Step {}/{}: {}", i + 1, playbook.steps.len(), step.name);

            let result = if dry_run {
                ActionResult::success(
                    &step.action,
                    format!("[DRY RUN] Would execute: {}", step.action),
                )
                .with_details(json!({"params": step.params, "dry_run": true}))
            } else {
                let params = substitute_variables(&step.params, context);
                let registry = Arc::clone(&self.registry);
                let action = step.action.clone();
                tokio::task::spawn_blocking(move || registry.execute_action(&action, &params))
                    .await
                    .unwrap_or_else(|e| {
                        ActionResult::failed(
                            &step.action,
                            format!("Action task panicked: {}", e),
                            e.to_string(),
                        )
                    })
            };

            steps_executed += 1;
            if let Some(data) = result.rollback_data.clone() {
                rollback_stack.push((step.action.clone(), data));
            }
            let failed = result.status == ActionStatus::Failed;
            step_results.push(result);

            if failed {
                steps_failed += 1;
                error!("Step failed: {}", step.name);
                if !dry_run && !rollback_stack.is_empty() {
                    info!("Executing rollback...");
                    self.execute_rollback(&rollback_stack).await;
                    rollback_executed = true;
                }
                break;
            }
        }

        let success = steps_failed == 0;
        PlaybookExecution {
            playbook_name: playbook.name.clone(),
            success,
            steps_executed,
            steps_failed,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            step_results,
            error: None,
            rollback_executed,
        }
    }

    /// Replay rollback data in reverse order of capture.
    async fn execute_rollback(&self, rollback_stack: &[(String, Value)]) {
        info!("Rolling back {} steps", rollback_stack.len());
        for (action_name, data) in rollback_stack.iter().rev() {
            match self.registry.get(action_name) {
                Some(action) => {
                    let data = data.clone();
                    let result =
                        tokio::task::spawn_blocking(move || action.rollback(&data)).await;
                    match result {
                        Ok(r) => info!("Rollback step completed: {:?}", r.status),
                        Err(e) => error!("Rollback failed for {}: {}", action_name, e),
                    }
                }
                None => error!("Action not found for rollback: {}", action_name),
            }
        }
    }
}

/// Replace `{{var}}` placeholders in string parameters with context values.
/// Unknown variables are left in place.
pub fn substitute_variables(params: &Value, context: &HashMap<String, String>) -> Value {
    let pattern = Regex::new(r"\{\{(\w+)\}\}").expect("static regex");
    substitute_value(params, context, &pattern)
}

fn substitute_value(value: &Value, context: &HashMap<String, String>, pattern: &Regex) -> Value {
    match value {
        Value::String(s) => {
            let mut out = s.clone();
            for cap in pattern.captures_iter(s) {
                let var = &cap[1];
                if let Some(replacement) = context.get(var) {
                    out = out.replace(&format!("{{{{{}}}}}", var), replacement);
                }
            }
            Value::String(out)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, context, pattern)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| substitute_value(v, context, pattern))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remediation::actions::RemediationAction;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    const PLAYBOOK_YAML: &str = r#"
name: "Fix Schema Mismatch"
description: "Repairs ETL mapping after an upstream field rename"
triggers:
  - incident_type: "SCHEMA_CHANGE"
    confidence_threshold: 90
conditions:
  - check: "etl_config_editable"
steps:
  - name: "Backup ETL config"
    action: "backup_file"
    params:
      file: "{{etl_config}}"
      destination: "{{backup_dir}}"
  - name: "Update mapping"
    action: "update_yaml"
    params:
      file: "{{etl_config}}"
      path: "mappings.orders.source_expected_key"
      changes:
        - old: "tracking_pixel_id"
          new: "source_id"
rollback:
  - name: "Restore ETL config"
    action: "restore_file"
    params: {}
"#;

    fn write_playbook(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("fix_schema_mismatch.yaml");
        std::fs::write(&path, PLAYBOOK_YAML).unwrap();
        path
    }

    #[test]
    fn test_load_playbook_from_yaml() {
        let dir = TempDir::new().unwrap();
        let path = write_playbook(&dir);
        let mut executor = PlaybookExecutor::new(Arc::new(ActionRegistry::with_builtin_actions()));
        let playbook = executor.load_playbook(&path).unwrap();
        assert_eq!(playbook.name, "Fix Schema Mismatch");
        assert_eq!(playbook.steps.len(), 2);
        assert_eq!(playbook.rollback.len(), 1);
        assert_eq!(playbook.triggers[0].incident_type, "SCHEMA_CHANGE");
    }

    #[test]
    fn test_load_directory_counts_yaml_files() {
        let dir = TempDir::new().unwrap();
        write_playbook(&dir);
        std::fs::write(dir.path().join("notes.txt"), "not a playbook").unwrap();
        let mut executor = PlaybookExecutor::new(Arc::new(ActionRegistry::with_builtin_actions()));
        assert_eq!(executor.load_playbooks_from_directory(dir.path()), 1);
        assert_eq!(
            executor.load_playbooks_from_directory(Path::new("/nonexistent")),
            0
        );
    }

    #[test]
    fn test_trigger_matching() {
        let playbook: Playbook = serde_yaml::from_str(PLAYBOOK_YAML).unwrap();
        assert!(PlaybookExecutor::matches_trigger(&playbook, "SCHEMA_CHANGE", 95.0));
        assert!(PlaybookExecutor::matches_trigger(&playbook, "schema_change", 90.0));
        assert!(!PlaybookExecutor::matches_trigger(&playbook, "SCHEMA_CHANGE", 85.0));
        assert!(!PlaybookExecutor::matches_trigger(&playbook, "FRESHNESS_VIOLATION", 99.0));
    }

    #[test]
    fn test_variable_substitution() {
        let mut context = HashMap::new();
        context.insert("etl_config".to_string(), "/etc/etl.yaml".to_string());
        let params = json!({
            "file": "{{etl_config}}",
            "nested": {"msg": "config at {{etl_config}} (cycle {{cycle_id}})"},
            "list": ["{{etl_config}}", 7],
        });
        let out = substitute_variables(&params, &context);
        assert_eq!(out["file"], "/etc/etl.yaml");
        // Unknown variables stay put.
        assert_eq!(out["nested"]["msg"], "config at /etc/etl.yaml (cycle {{cycle_id}})");
        assert_eq!(out["list"][0], "/etc/etl.yaml");
        assert_eq!(out["list"][1], 7);
    }

    #[tokio::test]
    async fn test_dry_run_simulates_all_steps() {
        let playbook: Playbook = serde_yaml::from_str(PLAYBOOK_YAML).unwrap();
        let executor = PlaybookExecutor::new(Arc::new(ActionRegistry::with_builtin_actions()));
        let execution = executor
            .execute_playbook(&playbook, &HashMap::new(), true)
            .await;
        assert!(execution.success);
        assert_eq!(execution.steps_executed, 2);
        assert!(!execution.rollback_executed);
        assert!(execution.step_results[0].message.contains("[DRY RUN]"));
    }

    #[tokio::test]
    async fn test_execution_end_to_end_updates_config() {
        let dir = TempDir::new().unwrap();
        let etl_config = dir.path().join("etl.yaml");
        std::fs::write(
            &etl_config,
            "mappings:\n  orders:\n    source_expected_key: tracking_pixel_id\n",
        )
        .unwrap();

        let playbook: Playbook = serde_yaml::from_str(PLAYBOOK_YAML).unwrap();
        let executor = PlaybookExecutor::new(Arc::new(ActionRegistry::with_builtin_actions()));
        let mut context = HashMap::new();
        context.insert("etl_config".to_string(), etl_config.display().to_string());
        context.insert(
            "backup_dir".to_string(),
            dir.path().join("backups").display().to_string(),
        );

        let execution = executor.execute_playbook(&playbook, &context, false).await;
        assert!(execution.success);
        assert_eq!(execution.steps_executed, 2);
        let updated = std::fs::read_to_string(&etl_config).unwrap();
        assert!(updated.contains("source_id"));
    }

    // Records rollback invocation order to verify reverse replay.
    struct RecordingAction {
        name: String,
        fail: bool,
        rollbacks: Arc<Mutex<Vec<String>>>,
        counter: Arc<AtomicUsize>,
    }

    impl RemediationAction for RecordingAction {
        fn name(&self) -> &str {
            &self.name
        }

        fn execute(&self, _params: &Value) -> ActionResult {
            self.counter.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                ActionResult::failed(&self.name, "boom", "Simulated")
            } else {
                ActionResult::success(&self.name, "ok")
                    .with_rollback_data(json!({"action": self.name}))
            }
        }

        fn rollback(&self, _rollback_data: &Value) -> ActionResult {
            self.rollbacks.lock().unwrap().push(self.name.clone());
            ActionResult::success(&self.name, "rolled back")
        }
    }

    #[tokio::test]
    async fn test_failure_stops_and_rolls_back_in_reverse() {
        let rollbacks = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = ActionRegistry::new();
        for (name, fail) in [("step_a", false), ("step_b", false), ("step_c", true)] {
            registry.register(Arc::new(RecordingAction {
                name: name.to_string(),
                fail,
                rollbacks: Arc::clone(&rollbacks),
                counter: Arc::clone(&counter),
            }));
        }

        let playbook = Playbook {
            name: "test".to_string(),
            description: String::new(),
            triggers: Vec::new(),
            conditions: Vec::new(),
            steps: ["step_a", "step_b", "step_c", "step_never"]
                .iter()
                .map(|a| PlaybookStep {
                    name: a.to_string(),
                    action: a.to_string(),
                    params: Value::Null,
                })
                .collect(),
            rollback: Vec::new(),
        };

        let executor = PlaybookExecutor::new(Arc::new(registry));
        let execution = executor
            .execute_playbook(&playbook, &HashMap::new(), false)
            .await;

        assert!(!execution.success);
        // Execution stopped at the failing third step.
        assert_eq!(execution.steps_executed, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(execution.rollback_executed);
        // Reverse order of rollback-data capture.
        assert_eq!(*rollbacks.lock().unwrap(), vec!["step_b", "step_a"]);
    }
}
