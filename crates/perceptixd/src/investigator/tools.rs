//! Investigation tools.
//!
//! Tools are synchronous and side-effect free against production systems:
//! the git tool reads a local checkout when one is mounted and otherwise
//! falls back to a deterministic simulated diff, the schema registry and
//! monitoring tools return canned answers shaped like the real services.
//! Failures are reported as error results, not panics; the investigator
//! records them as evidence.

use perceptix_common::models::{InvestigationStep, ToolResult, ToolStatus};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Known tool actions. Anything else routes to [`ToolKind::Unknown`], which
/// yields an error result instead of aborting the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolKind {
    CheckGitDiff,
    VerifyEtlMapping,
    MonitorBaseline,
    Unknown(String),
}

impl ToolKind {
    pub fn parse(action: &str) -> Self {
        match action {
            "check_git_diff" => ToolKind::CheckGitDiff,
            "verify_etl_mapping" => ToolKind::VerifyEtlMapping,
            "monitor_baseline" => ToolKind::MonitorBaseline,
            other => ToolKind::Unknown(other.to_string()),
        }
    }
}

/// Dispatches plan steps to tool implementations.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    /// Directory holding local repository checkouts for the git tool.
    repo_root: PathBuf,
}

impl ToolRegistry {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    /// Execute one investigation step. Never errors; tool failures come back
    /// as results with `status = error`.
    pub fn execute(&self, step: &InvestigationStep) -> ToolResult {
        let target = step.target.as_deref().unwrap_or("unknown");
        debug!(
            step_id = step.step_id,
            action = %step.action,
            target,
            "Executing investigation step"
        );

        match ToolKind::parse(&step.action) {
            ToolKind::CheckGitDiff => {
                self.check_git_diff(target, step.arg_str("file").unwrap_or(""))
            }
            ToolKind::VerifyEtlMapping => {
                verify_etl_mapping(target, step.arg_str("column").unwrap_or(""))
            }
            ToolKind::MonitorBaseline => {
                monitor_baseline(target, step.arg_str("metric").unwrap_or(""))
            }
            ToolKind::Unknown(action) => {
                warn!("Unknown tool requested: {}", action);
                ToolResult::error(action.clone(), format!("Unknown tool: {}", action))
            }
        }
    }

    /// Diff the latest commit of a mounted checkout. Without a checkout the
    /// tool stays deterministic with a simulated rename diff, preserving the
    /// end-to-end flow in demo environments.
    fn check_git_diff(&self, repo: &str, file: &str) -> ToolResult {
        let repo_path = self.repo_root.join(repo);
        if !repo_path.join(".git").is_dir() {
            return simulated_git_diff(file);
        }

        match run_git_diff(&repo_path, file) {
            Ok(Some(diff)) => {
                let mut details = Map::new();
                details.insert("diff_summary".into(), Value::String(diff));
                details.insert(
                    "files_modified".into(),
                    json!(if file.is_empty() { vec![] } else { vec![file] }),
                );
                ToolResult {
                    tool: "git".to_string(),
                    status: ToolStatus::Success,
                    message: None,
                    details,
                }
            }
            Ok(None) => ToolResult {
                tool: "git".to_string(),
                status: ToolStatus::NoRelevantChanges,
                message: Some("No relevant changes found in recent history".to_string()),
                details: Map::new(),
            },
            Err(e) => ToolResult::error("git", format!("Git diff tool failed: {}", e)),
        }
    }
}

fn run_git_diff(repo_path: &Path, file: &str) -> std::io::Result<Option<String>> {
    let mut cmd = Command::new("git");
    cmd.arg("-C")
        .arg(repo_path)
        .args(["diff", "HEAD~1", "HEAD"]);
    if !file.is_empty() {
        cmd.arg("--").arg(file);
    }
    let output = cmd.output()?;
    if !output.status.success() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    let diff = String::from_utf8_lossy(&output.stdout).to_string();
    if diff.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(diff))
    }
}

fn simulated_git_diff(file: &str) -> ToolResult {
    let file = if file.is_empty() {
        "events/tracker.py"
    } else {
        file
    };
    let diff = format!(
        "--- a/{file}\n+++ b/{file}\n@@\n- tracking_pixel_id\n+ source_id\n"
    );
    let mut details = Map::new();
    details.insert("diff_summary".into(), Value::String(diff));
    details.insert("author".into(), Value::String("simulated".to_string()));
    details.insert(
        "timestamp".into(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    details.insert("files_modified".into(), json!([file]));
    ToolResult {
        tool: "git".to_string(),
        status: ToolStatus::Success,
        message: None,
        details,
    }
}

/// Query the schema registry for the ETL mapping of one destination column.
/// The registry still maps the column to the pre-rename source key, which is
/// the mismatch the verifier looks for.
fn verify_etl_mapping(target_config: &str, column: &str) -> ToolResult {
    debug!(config = target_config, column, "Reading ETL mapping");
    let mut details = Map::new();
    details.insert(
        "current_mapping".into(),
        json!({
            "destination_column": column,
            "source_expected_key": "tracking_pixel_id",
            "last_updated": "2025-12-20T00:00:00Z",
        }),
    );
    ToolResult {
        tool: "schema_registry".to_string(),
        status: ToolStatus::Success,
        message: None,
        details,
    }
}

/// Compare a metric against its baseline. Inventory freshness reports a
/// violation; everything else reads as healthy.
fn monitor_baseline(target: &str, metric: &str) -> ToolResult {
    debug!(target, metric, "Checking metric baseline");
    if target.contains("inventory") && metric.contains("freshness") {
        let mut details = Map::new();
        details.insert("current_value".into(), json!(2880));
        details.insert("baseline_value".into(), json!(15));
        details.insert("deviation".into(), json!("19000%"));
        return ToolResult {
            tool: "monitoring".to_string(),
            status: ToolStatus::Failure,
            message: Some("Critical freshness violation: Inventory not updated in 48h".to_string()),
            details,
        };
    }

    let mut details = Map::new();
    details.insert("current_value".into(), json!(0.05));
    details.insert("baseline_value".into(), json!(0.05));
    details.insert("deviation".into(), json!("0.0%"));
    ToolResult {
        tool: "monitoring".to_string(),
        status: ToolStatus::Success,
        message: Some("Metric within normal thresholds".to_string()),
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn step(action: &str, target: &str, args: &[(&str, &str)]) -> InvestigationStep {
        InvestigationStep {
            step_id: 1,
            action: action.to_string(),
            target: Some(target.to_string()),
            args: args
                .iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_git_diff_falls_back_to_simulated_rename() {
        let registry = ToolRegistry::new("/nonexistent/repos");
        let result = registry.execute(&step(
            "check_git_diff",
            "checkout-service-api",
            &[("file", "events/tracker.py")],
        ));
        assert_eq!(result.status, ToolStatus::Success);
        let diff = result.detail_str("diff_summary").unwrap();
        assert!(diff.contains("- tracking_pixel_id"));
        assert!(diff.contains("+ source_id"));
    }

    #[test]
    fn test_etl_mapping_reports_stale_source_key() {
        let registry = ToolRegistry::new("/nonexistent/repos");
        let result = registry.execute(&step(
            "verify_etl_mapping",
            "warehouse_loader_config",
            &[("column", "attribution_source")],
        ));
        assert_eq!(result.status, ToolStatus::Success);
        let mapping = result.details.get("current_mapping").unwrap();
        assert_eq!(mapping["source_expected_key"], "tracking_pixel_id");
        assert_eq!(mapping["destination_column"], "attribution_source");
    }

    #[test]
    fn test_monitor_baseline_flags_inventory_freshness() {
        let registry = ToolRegistry::new("/nonexistent/repos");
        let result = registry.execute(&step(
            "monitor_baseline",
            "inventory_table",
            &[("metric", "freshness_minutes")],
        ));
        assert_eq!(result.status, ToolStatus::Failure);
        assert_eq!(result.details["current_value"], 2880);
    }

    #[test]
    fn test_monitor_baseline_healthy_metric() {
        let registry = ToolRegistry::new("/nonexistent/repos");
        let result = registry.execute(&step(
            "monitor_baseline",
            "orders_table",
            &[("metric", "attribution_source_null_rate")],
        ));
        assert_eq!(result.status, ToolStatus::Success);
    }

    #[test]
    fn test_unknown_tool_yields_error_result() {
        let registry = ToolRegistry::new("/nonexistent/repos");
        let result = registry.execute(&step("drop_all_tables", "warehouse", &[]));
        assert_eq!(result.status, ToolStatus::Error);
        assert!(result.message.unwrap().contains("Unknown tool"));
    }
}
