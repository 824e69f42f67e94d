//! Plan execution and evidence collection.
//!
//! The investigator walks the reasoner's plan, runs each step's tool on the
//! blocking pool, and returns exactly one evidence item per step. Step
//! failures never abort the plan: they become error evidence, so the
//! evidence list always has the same length and order as the plan.

pub mod tools;

pub use tools::{ToolKind, ToolRegistry};

use perceptix_common::models::{EvidenceItem, InvestigationStep, ToolResult};
use perceptix_common::{PerceptixConfig, PerceptixError};
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct Investigator {
    registry: Arc<ToolRegistry>,
}

impl Investigator {
    pub fn new(_config: &PerceptixConfig) -> Self {
        Self {
            registry: Arc::new(ToolRegistry::new("data/repos")),
        }
    }

    #[cfg(test)]
    pub fn with_registry(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Execute every plan step and collect evidence.
    ///
    /// Steps run concurrently on the blocking pool but results are joined in
    /// plan order. An empty plan is a hard error; a failing step is not.
    pub async fn execute_plan(
        &self,
        plan: &[InvestigationStep],
    ) -> Result<Vec<EvidenceItem>, PerceptixError> {
        if plan.is_empty() {
            return Err(PerceptixError::Investigator(
                "Investigation plan is empty".to_string(),
            ));
        }

        info!("Executing investigation plan with {} steps", plan.len());

        let mut handles = Vec::with_capacity(plan.len());
        for step in plan {
            let registry = Arc::clone(&self.registry);
            let step = step.clone();
            handles.push((
                step.step_id,
                step.action.clone(),
                tokio::task::spawn_blocking(move || registry.execute(&step)),
            ));
        }

        let mut evidence = Vec::with_capacity(handles.len());
        for (step_id, action, handle) in handles {
            let result: ToolResult = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Error executing step {}: {}", step_id, e);
                    ToolResult::error(action.clone(), format!("Tool execution failed: {}", e))
                }
            };
            debug!(
                "Step {} completed: status={}",
                step_id,
                result.status.as_str()
            );
            evidence.push(EvidenceItem {
                step_id,
                action,
                evidence: result,
            });
        }

        Ok(evidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perceptix_common::models::ToolStatus;
    use std::collections::HashMap;

    fn investigator() -> Investigator {
        Investigator::with_registry(ToolRegistry::new("/nonexistent/repos"))
    }

    fn step(step_id: u32, action: &str, target: &str) -> InvestigationStep {
        InvestigationStep {
            step_id,
            action: action.to_string(),
            target: Some(target.to_string()),
            args: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_empty_plan_is_fatal() {
        let err = investigator().execute_plan(&[]).await.unwrap_err();
        assert!(matches!(err, PerceptixError::Investigator(_)));
    }

    #[tokio::test]
    async fn test_one_evidence_item_per_step_in_plan_order() {
        let plan = vec![
            step(1, "check_git_diff", "checkout-service-api"),
            step(2, "verify_etl_mapping", "warehouse_loader_config"),
            step(3, "monitor_baseline", "orders_table"),
        ];
        let evidence = investigator().execute_plan(&plan).await.unwrap();
        assert_eq!(evidence.len(), plan.len());
        for (item, step) in evidence.iter().zip(&plan) {
            assert_eq!(item.step_id, step.step_id);
            assert_eq!(item.action, step.action);
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_error_evidence() {
        let plan = vec![
            step(1, "check_git_diff", "checkout-service-api"),
            step(2, "launch_missiles", "warehouse"),
        ];
        let evidence = investigator().execute_plan(&plan).await.unwrap();
        assert_eq!(evidence.len(), 2);
        assert_eq!(evidence[1].evidence.status, ToolStatus::Error);
    }
}
