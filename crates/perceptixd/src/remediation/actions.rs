//! Remediation actions and the action registry.
//!
//! Actions are synchronous; the executor runs them on the blocking pool.
//! They never panic or propagate errors: every outcome is an
//! [`ActionResult`], and a successful action that changed state attaches
//! `rollback_data` so the executor can undo it later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Failed,
    Skipped,
}

/// Outcome of one action execution or rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    pub message: String,
    pub action_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_data: Option<Value>,
}

impl ActionResult {
    pub fn success(action: &str, message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Success,
            message: message.into(),
            action_name: action.to_string(),
            timestamp: Utc::now(),
            details: Value::Null,
            error: None,
            rollback_data: None,
        }
    }

    pub fn failed(action: &str, message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Failed,
            message: message.into(),
            action_name: action.to_string(),
            timestamp: Utc::now(),
            details: Value::Null,
            error: Some(error.into()),
            rollback_data: None,
        }
    }

    pub fn skipped(action: &str, message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Skipped,
            message: message.into(),
            action_name: action.to_string(),
            timestamp: Utc::now(),
            details: Value::Null,
            error: None,
            rollback_data: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_rollback_data(mut self, data: Value) -> Self {
        self.rollback_data = Some(data);
        self
    }
}

/// A single remediation capability.
pub trait RemediationAction: Send + Sync {
    fn name(&self) -> &str;
    fn execute(&self, params: &Value) -> ActionResult;
    fn rollback(&self, rollback_data: &Value) -> ActionResult;
}

/// Maps action names from playbook steps to implementations. Unknown names
/// come back as failed results, not errors.
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn RemediationAction>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Registry with the built-in action set.
    pub fn with_builtin_actions() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BackupFileAction));
        registry.register(Arc::new(RestoreFileAction));
        registry.register(Arc::new(UpdateYamlAction));
        registry.register(Arc::new(SendSlackMessageAction));
        registry.register(Arc::new(LogMessageAction));
        registry.register(Arc::new(GitRevertAction));
        registry.register(Arc::new(RerunPipelineAction));
        registry
    }

    pub fn register(&mut self, action: Arc<dyn RemediationAction>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RemediationAction>> {
        self.actions.get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn execute_action(&self, name: &str, params: &Value) -> ActionResult {
        match self.actions.get(name) {
            Some(action) => action.execute(params),
            None => ActionResult::failed(
                name,
                format!("Action '{}' not registered", name),
                "UnknownAction",
            ),
        }
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_builtin_actions()
    }
}

fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

// ============================================================================
// FILE ACTIONS
// ============================================================================

/// Copy a file into a destination directory with a timestamped name.
pub struct BackupFileAction;

impl RemediationAction for BackupFileAction {
    fn name(&self) -> &str {
        "backup_file"
    }

    fn execute(&self, params: &Value) -> ActionResult {
        let (source, destination) = match (param_str(params, "file"), param_str(params, "destination")) {
            (Some(f), Some(d)) => (PathBuf::from(f), PathBuf::from(d)),
            _ => {
                return ActionResult::failed(
                    self.name(),
                    "Missing required params: file, destination",
                    "InvalidParams",
                )
            }
        };

        if !source.exists() {
            return ActionResult::failed(
                self.name(),
                format!("Source file not found: {}", source.display()),
                "FileNotFound",
            );
        }
        if let Err(e) = std::fs::create_dir_all(&destination) {
            return ActionResult::failed(
                self.name(),
                format!("Cannot create destination: {}", e),
                e.to_string(),
            );
        }

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let backup_path = destination.join(format!(
            "{}.backup_{}",
            file_name,
            Utc::now().format("%Y%m%d_%H%M%S")
        ));

        match std::fs::copy(&source, &backup_path) {
            Ok(_) => {
                info!("Backed up {} to {}", source.display(), backup_path.display());
                ActionResult::success(
                    self.name(),
                    format!("Successfully backed up file to {}", backup_path.display()),
                )
                .with_details(json!({
                    "source": source.display().to_string(),
                    "backup": backup_path.display().to_string(),
                }))
                .with_rollback_data(json!({
                    "backup_path": backup_path.display().to_string(),
                }))
            }
            Err(e) => ActionResult::failed(
                self.name(),
                format!("Backup failed: {}", e),
                e.to_string(),
            ),
        }
    }

    fn rollback(&self, rollback_data: &Value) -> ActionResult {
        let backup_path = match param_str(rollback_data, "backup_path") {
            Some(p) => PathBuf::from(p),
            None => return ActionResult::skipped(self.name(), "No backup path recorded"),
        };
        if !backup_path.exists() {
            return ActionResult::skipped(self.name(), "Backup file not found, nothing to rollback");
        }
        match std::fs::remove_file(&backup_path) {
            Ok(()) => ActionResult::success(
                self.name(),
                format!("Removed backup: {}", backup_path.display()),
            ),
            Err(e) => ActionResult::failed(
                self.name(),
                format!("Rollback failed: {}", e),
                e.to_string(),
            ),
        }
    }
}

/// Copy a backup file over a target path.
pub struct RestoreFileAction;

impl RemediationAction for RestoreFileAction {
    fn name(&self) -> &str {
        "restore_file"
    }

    fn execute(&self, params: &Value) -> ActionResult {
        let (backup, target) = match (param_str(params, "backup"), param_str(params, "target")) {
            (Some(b), Some(t)) => (PathBuf::from(b), PathBuf::from(t)),
            _ => {
                return ActionResult::failed(
                    self.name(),
                    "Missing required params: backup, target",
                    "InvalidParams",
                )
            }
        };

        if !backup.exists() {
            return ActionResult::failed(
                self.name(),
                format!("Backup file not found: {}", backup.display()),
                "FileNotFound",
            );
        }

        // Preserve the overwritten content so the restore itself can be undone.
        let previous = std::fs::read_to_string(&target).ok();

        match std::fs::copy(&backup, &target) {
            Ok(_) => {
                info!("Restored {} from {}", target.display(), backup.display());
                let mut result = ActionResult::success(
                    self.name(),
                    format!("Restored {} from backup", target.display()),
                );
                if let Some(previous) = previous {
                    result = result.with_rollback_data(json!({
                        "target": target.display().to_string(),
                        "previous_content": previous,
                    }));
                }
                result
            }
            Err(e) => ActionResult::failed(
                self.name(),
                format!("Restore failed: {}", e),
                e.to_string(),
            ),
        }
    }

    fn rollback(&self, rollback_data: &Value) -> ActionResult {
        let (target, content) = match (
            param_str(rollback_data, "target"),
            param_str(rollback_data, "previous_content"),
        ) {
            (Some(t), Some(c)) => (PathBuf::from(t), c),
            _ => return ActionResult::skipped(self.name(), "No previous content recorded"),
        };
        match std::fs::write(&target, content) {
            Ok(()) => ActionResult::success(
                self.name(),
                format!("Reverted restore of {}", target.display()),
            ),
            Err(e) => ActionResult::failed(
                self.name(),
                format!("Rollback failed: {}", e),
                e.to_string(),
            ),
        }
    }
}

// ============================================================================
// YAML CONFIG ACTION
// ============================================================================

/// Apply old->new replacements to a value addressed by a dot path inside a
/// YAML file. Supports string values and lists of strings; captures the
/// original value for rollback.
pub struct UpdateYamlAction;

impl UpdateYamlAction {
    fn navigate<'a>(
        root: &'a mut serde_yaml::Value,
        parts: &[&str],
    ) -> Option<&'a mut serde_yaml::Value> {
        let mut current = root;
        for part in parts {
            current = current.get_mut(*part)?;
        }
        Some(current)
    }
}

impl RemediationAction for UpdateYamlAction {
    fn name(&self) -> &str {
        "update_yaml"
    }

    fn execute(&self, params: &Value) -> ActionResult {
        let file = match param_str(params, "file") {
            Some(f) => PathBuf::from(f),
            None => {
                return ActionResult::failed(self.name(), "Missing param: file", "InvalidParams")
            }
        };
        let path = match param_str(params, "path") {
            Some(p) => p.to_string(),
            None => {
                return ActionResult::failed(self.name(), "Missing param: path", "InvalidParams")
            }
        };
        let changes: Vec<(String, String)> = match params.get("changes").and_then(Value::as_array) {
            Some(list) => list
                .iter()
                .filter_map(|c| {
                    Some((
                        c.get("old")?.as_str()?.to_string(),
                        c.get("new")?.as_str()?.to_string(),
                    ))
                })
                .collect(),
            None => {
                return ActionResult::failed(self.name(), "Missing param: changes", "InvalidParams")
            }
        };

        let raw = match std::fs::read_to_string(&file) {
            Ok(r) => r,
            Err(e) => {
                return ActionResult::failed(
                    self.name(),
                    format!("YAML file not found: {}", file.display()),
                    e.to_string(),
                )
            }
        };
        let mut doc: serde_yaml::Value = match serde_yaml::from_str(&raw) {
            Ok(d) => d,
            Err(e) => {
                return ActionResult::failed(
                    self.name(),
                    format!("Invalid YAML in {}", file.display()),
                    e.to_string(),
                )
            }
        };

        let parts: Vec<&str> = path.split('.').collect();
        let node = match Self::navigate(&mut doc, &parts) {
            Some(n) => n,
            None => {
                return ActionResult::failed(
                    self.name(),
                    format!("Path not found in YAML: {}", path),
                    "InvalidPath",
                )
            }
        };

        let original: serde_yaml::Value = node.clone();
        match node {
            serde_yaml::Value::String(s) => {
                let mut updated = s.clone();
                for (old, new) in &changes {
                    updated = updated.replace(old, new);
                }
                *s = updated;
            }
            serde_yaml::Value::Sequence(items) => {
                for item in items.iter_mut() {
                    if let serde_yaml::Value::String(s) = item {
                        if let Some((_, new)) = changes.iter().find(|(old, _)| old == s) {
                            *s = new.clone();
                        }
                    }
                }
            }
            other => {
                return ActionResult::failed(
                    self.name(),
                    format!("Unsupported YAML value type at {}: {:?}", path, other),
                    "UnsupportedType",
                )
            }
        }

        let serialized = match serde_yaml::to_string(&doc) {
            Ok(s) => s,
            Err(e) => {
                return ActionResult::failed(self.name(), "YAML serialization failed", e.to_string())
            }
        };
        if let Err(e) = std::fs::write(&file, serialized) {
            return ActionResult::failed(
                self.name(),
                format!("Failed to write {}", file.display()),
                e.to_string(),
            );
        }

        info!("Updated YAML file: {}", file.display());
        ActionResult::success(self.name(), format!("Successfully updated {}", file.display()))
            .with_details(json!({
                "file": file.display().to_string(),
                "changes": changes.iter()
                    .map(|(old, new)| json!({"old": old, "new": new}))
                    .collect::<Vec<_>>(),
            }))
            .with_rollback_data(json!({
                "file": file.display().to_string(),
                "path": path,
                "original_value": serde_json::to_value(&original).unwrap_or(Value::Null),
            }))
    }

    fn rollback(&self, rollback_data: &Value) -> ActionResult {
        let file = match param_str(rollback_data, "file") {
            Some(f) => PathBuf::from(f),
            None => return ActionResult::skipped(self.name(), "No rollback file recorded"),
        };
        let path = match param_str(rollback_data, "path") {
            Some(p) => p.to_string(),
            None => return ActionResult::skipped(self.name(), "No rollback path recorded"),
        };
        let original: serde_yaml::Value =
            match serde_json::from_value(rollback_data.get("original_value").cloned().unwrap_or(Value::Null)) {
                Ok(v) => v,
                Err(e) => {
                    return ActionResult::failed(
                        self.name(),
                        "Invalid rollback payload",
                        e.to_string(),
                    )
                }
            };

        let raw = match std::fs::read_to_string(&file) {
            Ok(r) => r,
            Err(e) => {
                return ActionResult::failed(
                    self.name(),
                    format!("YAML rollback failed: {}", e),
                    e.to_string(),
                )
            }
        };
        let mut doc: serde_yaml::Value = match serde_yaml::from_str(&raw) {
            Ok(d) => d,
            Err(e) => {
                return ActionResult::failed(
                    self.name(),
                    format!("YAML rollback failed: {}", e),
                    e.to_string(),
                )
            }
        };

        let parts: Vec<&str> = path.split('.').collect();
        match Self::navigate(&mut doc, &parts) {
            Some(node) => *node = original,
            None => {
                return ActionResult::failed(
                    self.name(),
                    format!("Path not found during rollback: {}", path),
                    "InvalidPath",
                )
            }
        }

        match serde_yaml::to_string(&doc)
            .map_err(|e| e.to_string())
            .and_then(|s| std::fs::write(&file, s).map_err(|e| e.to_string()))
        {
            Ok(()) => ActionResult::success(
                self.name(),
                format!("Successfully rolled back YAML changes in {}", file.display()),
            ),
            Err(e) => ActionResult::failed(
                self.name(),
                format!("YAML rollback failed: {}", e),
                e,
            ),
        }
    }
}

// ============================================================================
// GIT ACTION
// ============================================================================

/// Revert a commit in a local checkout. Captures the pre-revert HEAD so the
/// revert itself can be undone with a hard reset.
pub struct GitRevertAction;

impl GitRevertAction {
    fn run_git(repo: &std::path::Path, args: &[&str]) -> Result<String, String> {
        let output = std::process::Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .output()
            .map_err(|e| e.to_string())?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

impl RemediationAction for GitRevertAction {
    fn name(&self) -> &str {
        "git_revert"
    }

    fn execute(&self, params: &Value) -> ActionResult {
        let commit = match param_str(params, "commit") {
            Some(c) => c.to_string(),
            None => {
                return ActionResult::failed(self.name(), "Missing param: commit", "InvalidParams")
            }
        };
        let repo = PathBuf::from(param_str(params, "repo").unwrap_or("."));

        if !repo.join(".git").is_dir() {
            return ActionResult::failed(
                self.name(),
                format!("Not a git repository: {}", repo.display()),
                "NotARepository",
            );
        }

        let previous_head = match Self::run_git(&repo, &["rev-parse", "HEAD"]) {
            Ok(head) => head,
            Err(e) => {
                return ActionResult::failed(self.name(), "Cannot resolve HEAD", e)
            }
        };

        match Self::run_git(&repo, &["revert", "--no-edit", &commit]) {
            Ok(_) => {
                info!("Reverted commit {} in {}", commit, repo.display());
                ActionResult::success(self.name(), format!("Reverted commit {}", commit))
                    .with_details(json!({
                        "commit": commit,
                        "repo": repo.display().to_string(),
                    }))
                    .with_rollback_data(json!({
                        "repo": repo.display().to_string(),
                        "previous_head": previous_head,
                    }))
            }
            Err(e) => ActionResult::failed(
                self.name(),
                format!("Revert of {} failed", commit),
                e,
            ),
        }
    }

    fn rollback(&self, rollback_data: &Value) -> ActionResult {
        let (repo, head) = match (
            param_str(rollback_data, "repo"),
            param_str(rollback_data, "previous_head"),
        ) {
            (Some(r), Some(h)) => (PathBuf::from(r), h.to_string()),
            _ => return ActionResult::skipped(self.name(), "No pre-revert HEAD recorded"),
        };
        match Self::run_git(&repo, &["reset", "--hard", &head]) {
            Ok(_) => ActionResult::success(
                self.name(),
                format!("Reset {} back to {}", repo.display(), head),
            ),
            Err(e) => ActionResult::failed(
                self.name(),
                format!("Reset to {} failed", head),
                e,
            ),
        }
    }
}

// ============================================================================
// PIPELINE ACTION
// ============================================================================

/// Request a pipeline re-run. Posts to the scheduler endpoint when one is
/// configured; otherwise the request is recorded in the daemon log for the
/// on-call to act on.
pub struct RerunPipelineAction;

impl RemediationAction for RerunPipelineAction {
    fn name(&self) -> &str {
        "rerun_pipeline"
    }

    fn execute(&self, params: &Value) -> ActionResult {
        let pipeline = match param_str(params, "pipeline") {
            Some(p) => p.to_string(),
            None => {
                return ActionResult::failed(self.name(), "Missing param: pipeline", "InvalidParams")
            }
        };
        let environment = param_str(params, "environment").unwrap_or("production").to_string();

        let endpoint = match param_str(params, "endpoint") {
            // An unsubstituted {{placeholder}} means no scheduler endpoint is
            // configured for this deployment.
            Some(e) if !e.starts_with("{{") => Some(e.to_string()),
            _ => None,
        };

        let details = json!({
            "pipeline": pipeline,
            "environment": environment,
            "requested_at": Utc::now().to_rfc3339(),
        });

        let Some(endpoint) = endpoint else {
            info!(
                "[remediation] Re-run requested for pipeline {} ({})",
                pipeline, environment
            );
            return ActionResult::success(
                self.name(),
                format!("Re-run request recorded for pipeline {}", pipeline),
            )
            .with_details(details);
        };

        let client = match reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                return ActionResult::failed(self.name(), "HTTP client build failed", e.to_string())
            }
        };

        match client.post(&endpoint).json(&details).send() {
            Ok(resp) if resp.status().is_success() => ActionResult::success(
                self.name(),
                format!("Re-run dispatched for pipeline {}", pipeline),
            )
            .with_details(details),
            Ok(resp) => ActionResult::failed(
                self.name(),
                format!("Scheduler returned HTTP {}", resp.status()),
                resp.status().to_string(),
            ),
            Err(e) => {
                error!("Pipeline re-run dispatch failed: {}", e);
                ActionResult::failed(self.name(), "Re-run dispatch failed", e.to_string())
            }
        }
    }

    fn rollback(&self, _rollback_data: &Value) -> ActionResult {
        ActionResult::skipped(self.name(), "Re-run requests cannot be recalled")
    }
}

// ============================================================================
// NOTIFICATION ACTIONS
// ============================================================================

/// Post a message to a Slack webhook.
pub struct SendSlackMessageAction;

impl RemediationAction for SendSlackMessageAction {
    fn name(&self) -> &str {
        "send_slack_message"
    }

    fn execute(&self, params: &Value) -> ActionResult {
        let webhook = match param_str(params, "webhook_url") {
            // An unsubstituted {{placeholder}} means no webhook is configured
            // for this deployment.
            Some(w) if !w.starts_with("{{") => w.to_string(),
            _ => return ActionResult::skipped(self.name(), "No webhook_url configured"),
        };
        let message = param_str(params, "message").unwrap_or("(no message)").to_string();

        let client = match reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                return ActionResult::failed(self.name(), "HTTP client build failed", e.to_string())
            }
        };

        match client.post(&webhook).json(&json!({"text": message})).send() {
            Ok(resp) if resp.status().is_success() => {
                ActionResult::success(self.name(), "Slack message sent")
            }
            Ok(resp) => ActionResult::failed(
                self.name(),
                format!("Slack webhook returned HTTP {}", resp.status()),
                resp.status().to_string(),
            ),
            Err(e) => {
                error!("Slack delivery failed: {}", e);
                ActionResult::failed(self.name(), "Slack delivery failed", e.to_string())
            }
        }
    }

    fn rollback(&self, _rollback_data: &Value) -> ActionResult {
        ActionResult::skipped(self.name(), "Notifications cannot be rolled back")
    }
}

/// Write a structured line into the daemon log.
pub struct LogMessageAction;

impl RemediationAction for LogMessageAction {
    fn name(&self) -> &str {
        "log_message"
    }

    fn execute(&self, params: &Value) -> ActionResult {
        let message = param_str(params, "message").unwrap_or("(no message)");
        match param_str(params, "level").unwrap_or("info") {
            "warn" | "warning" => warn!("[remediation] {}", message),
            "error" => error!("[remediation] {}", message),
            _ => info!("[remediation] {}", message),
        }
        ActionResult::success(self.name(), "Message logged")
    }

    fn rollback(&self, _rollback_data: &Value) -> ActionResult {
        ActionResult::skipped(self.name(), "Log entries cannot be rolled back")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unknown_action_fails_cleanly() {
        let registry = ActionRegistry::with_builtin_actions();
        let result = registry.execute_action("format_disk", &json!({}));
        assert_eq!(result.status, ActionStatus::Failed);
        assert!(result.message.contains("not registered"));
    }

    #[test]
    fn test_backup_and_rollback() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("config.yaml");
        std::fs::write(&source, "key: value\n").unwrap();
        let dest = dir.path().join("backups");

        let result = BackupFileAction.execute(&json!({
            "file": source.display().to_string(),
            "destination": dest.display().to_string(),
        }));
        assert_eq!(result.status, ActionStatus::Success);
        let rollback_data = result.rollback_data.unwrap();
        let backup_path = PathBuf::from(rollback_data["backup_path"].as_str().unwrap());
        assert!(backup_path.exists());

        let rb = BackupFileAction.rollback(&rollback_data);
        assert_eq!(rb.status, ActionStatus::Success);
        assert!(!backup_path.exists());
    }

    #[test]
    fn test_backup_missing_source_fails() {
        let result = BackupFileAction.execute(&json!({
            "file": "/nonexistent/config.yaml",
            "destination": "/tmp",
        }));
        assert_eq!(result.status, ActionStatus::Failed);
    }

    #[test]
    fn test_update_yaml_string_value_and_rollback() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("etl.yaml");
        std::fs::write(
            &file,
            "mappings:\n  orders:\n    source_expected_key: tracking_pixel_id\n",
        )
        .unwrap();

        let result = UpdateYamlAction.execute(&json!({
            "file": file.display().to_string(),
            "path": "mappings.orders.source_expected_key",
            "changes": [{"old": "tracking_pixel_id", "new": "source_id"}],
        }));
        assert_eq!(result.status, ActionStatus::Success);
        let updated = std::fs::read_to_string(&file).unwrap();
        assert!(updated.contains("source_id"));
        assert!(!updated.contains("tracking_pixel_id"));

        let rb = UpdateYamlAction.rollback(&result.rollback_data.unwrap());
        assert_eq!(rb.status, ActionStatus::Success);
        let reverted = std::fs::read_to_string(&file).unwrap();
        assert!(reverted.contains("tracking_pixel_id"));
    }

    #[test]
    fn test_update_yaml_list_value() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("etl.yaml");
        std::fs::write(&file, "columns:\n  - tracking_pixel_id\n  - order_id\n").unwrap();

        let result = UpdateYamlAction.execute(&json!({
            "file": file.display().to_string(),
            "path": "columns",
            "changes": [{"old": "tracking_pixel_id", "new": "source_id"}],
        }));
        assert_eq!(result.status, ActionStatus::Success);
        let updated = std::fs::read_to_string(&file).unwrap();
        assert!(updated.contains("source_id"));
        assert!(updated.contains("order_id"));
    }

    #[test]
    fn test_update_yaml_bad_path_fails() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("etl.yaml");
        std::fs::write(&file, "a: 1\n").unwrap();
        let result = UpdateYamlAction.execute(&json!({
            "file": file.display().to_string(),
            "path": "missing.key",
            "changes": [{"old": "x", "new": "y"}],
        }));
        assert_eq!(result.status, ActionStatus::Failed);
    }

    #[test]
    fn test_slack_without_webhook_is_skipped() {
        let result = SendSlackMessageAction.execute(&json!({"message": "hi"}));
        assert_eq!(result.status, ActionStatus::Skipped);
    }

    #[test]
    fn test_git_revert_outside_repository_fails() {
        let dir = TempDir::new().unwrap();
        let result = GitRevertAction.execute(&json!({
            "commit": "abc1234",
            "repo": dir.path().display().to_string(),
        }));
        assert_eq!(result.status, ActionStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("NotARepository"));
    }

    #[test]
    fn test_git_revert_requires_commit_param() {
        let result = GitRevertAction.execute(&json!({}));
        assert_eq!(result.status, ActionStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("InvalidParams"));

        let rb = GitRevertAction.rollback(&Value::Null);
        assert_eq!(rb.status, ActionStatus::Skipped);
    }

    #[test]
    fn test_rerun_pipeline_without_endpoint_records_request() {
        let result = RerunPipelineAction.execute(&json!({
            "pipeline": "inventory_sync",
            "environment": "staging",
        }));
        assert_eq!(result.status, ActionStatus::Success);
        assert_eq!(result.details["pipeline"], "inventory_sync");
        assert_eq!(result.details["environment"], "staging");
        assert_eq!(
            RerunPipelineAction.rollback(&Value::Null).status,
            ActionStatus::Skipped
        );
    }

    #[test]
    fn test_rerun_pipeline_requires_pipeline_param() {
        let result = RerunPipelineAction.execute(&json!({"environment": "staging"}));
        assert_eq!(result.status, ActionStatus::Failed);
    }

    #[test]
    fn test_rerun_pipeline_ignores_unsubstituted_endpoint() {
        let result = RerunPipelineAction.execute(&json!({
            "pipeline": "inventory_sync",
            "endpoint": "{{scheduler_endpoint}}",
        }));
        // Placeholder endpoint means log-only, never an HTTP attempt.
        assert_eq!(result.status, ActionStatus::Success);
    }

    #[test]
    fn test_builtin_registry_includes_git_and_pipeline_actions() {
        let registry = ActionRegistry::with_builtin_actions();
        let names = registry.list();
        assert!(names.contains(&"git_revert".to_string()));
        assert!(names.contains(&"rerun_pipeline".to_string()));
    }

    #[test]
    fn test_log_message_succeeds() {
        let result = LogMessageAction.execute(&json!({"message": "remediation note"}));
        assert_eq!(result.status, ActionStatus::Success);
        assert_eq!(
            LogMessageAction.rollback(&Value::Null).status,
            ActionStatus::Skipped
        );
    }
}
