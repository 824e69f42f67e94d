//! Observation layer: system state snapshots plus anomaly side channels.
//!
//! The orchestrator only sees the [`Observer`] trait. Production deployments
//! would plug warehouse connectors in here; the bundled [`DemoObserver`]
//! produces deterministic snapshots for the demo scenarios so the whole
//! pipeline runs without external I/O.
//!
//! Alongside the raw state, every observation carries two advisory side
//! channels: lightweight ML anomaly predictions and a declarative rules
//! evaluation. Both feed trigger evaluation, neither can abort a cycle.

use chrono::Utc;
use perceptix_common::models::{
    CodeCommit, HistoricalBaseline, MlPrediction, ObservationPackage, PipelineEvent,
    RulesEvaluation, SystemMetadata, SystemState, TableMetric, Telemetry,
};
use perceptix_common::PerceptixError;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

const COMPONENT_ID: &str = "observer";

/// Source of system state snapshots.
pub trait Observer: Send + Sync {
    fn observe(&self) -> Result<ObservationPackage, PerceptixError>;
    fn name(&self) -> &str;
}

/// Demo scenarios, selectable via config or the PERCEPTIX_SCENARIO variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoScenario {
    /// Upstream field rename drives attribution nulls to 0.99.
    SchemaDrift,
    /// Inventory sync stalls for 48h with a failed pipeline run.
    FreshnessStall,
    /// Everything within baseline.
    Healthy,
}

impl DemoScenario {
    pub fn from_env() -> Self {
        match std::env::var("PERCEPTIX_SCENARIO").as_deref() {
            Ok("INVENTORY") | Ok("FRESHNESS") => DemoScenario::FreshnessStall,
            Ok("HEALTHY") => DemoScenario::Healthy,
            _ => DemoScenario::SchemaDrift,
        }
    }
}

/// Deterministic observer used in demo mode.
pub struct DemoObserver {
    scenario: DemoScenario,
    /// When set, observe() fails, for exercising the fatal-observation path.
    simulate_failure: bool,
}

impl DemoObserver {
    pub fn new(scenario: DemoScenario) -> Self {
        Self {
            scenario,
            simulate_failure: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            scenario: DemoScenario::Healthy,
            simulate_failure: true,
        }
    }

    fn build_state(&self) -> SystemState {
        let now = Utc::now().to_rfc3339();

        let mut orders_nulls = HashMap::new();
        orders_nulls.insert("attribution_source".to_string(), 0.01);
        orders_nulls.insert("order_id".to_string(), 0.0);
        let mut orders = TableMetric {
            row_count: 125_000,
            freshness_minutes: 5,
            null_rates: orders_nulls,
            last_updated: Some(now.clone()),
        };

        let mut inventory_nulls = HashMap::new();
        inventory_nulls.insert("sku".to_string(), 0.0);
        let mut inventory = TableMetric {
            row_count: 52_000,
            freshness_minutes: 10,
            null_rates: inventory_nulls,
            last_updated: Some(now.clone()),
        };

        let mut baselines = BTreeMap::new();
        baselines.insert(
            "orders_table".to_string(),
            HistoricalBaseline {
                avg_daily_rows: 120_000,
                avg_attribution_null_rate: 0.01,
            },
        );
        baselines.insert(
            "inventory_table".to_string(),
            HistoricalBaseline {
                avg_daily_rows: 50_000,
                avg_attribution_null_rate: 0.0,
            },
        );

        let mut pipeline_events = Vec::new();
        let mut recent_code_commits = Vec::new();

        match self.scenario {
            DemoScenario::SchemaDrift => {
                orders
                    .null_rates
                    .insert("attribution_source".to_string(), 0.99);
                pipeline_events.push(PipelineEvent {
                    pipeline: "daily_orders".to_string(),
                    status: "FAILED".to_string(),
                    severity: "HIGH".to_string(),
                    timestamp: Some(now.clone()),
                });
                recent_code_commits.push(CodeCommit {
                    repo: "checkout-service-api".to_string(),
                    author: "dev-team".to_string(),
                    message: "refactor: rename tracking_pixel_id to source_id".to_string(),
                    timestamp: now.clone(),
                    files_changed: vec!["events/tracker.py".to_string()],
                });
                info!("Simulating failure: orders_table.attribution_source null_rate=0.99 + failed pipeline event");
            }
            DemoScenario::FreshnessStall => {
                inventory.freshness_minutes = 2880;
                pipeline_events.push(PipelineEvent {
                    pipeline: "inventory_sync".to_string(),
                    status: "FAILED".to_string(),
                    severity: "HIGH".to_string(),
                    timestamp: Some(now.clone()),
                });
                info!("Simulating failure: inventory_table freshness=2880 (stale) + failed pipeline event");
            }
            DemoScenario::Healthy => {}
        }

        let mut table_metrics = BTreeMap::new();
        table_metrics.insert("orders_table".to_string(), orders);
        table_metrics.insert("inventory_table".to_string(), inventory);

        let mut dependency_map = BTreeMap::new();
        dependency_map.insert(
            "orders_table".to_string(),
            vec!["inventory_table".to_string()],
        );
        dependency_map.insert("inventory_table".to_string(), Vec::new());

        SystemState {
            metadata: SystemMetadata {
                domain: "perceptix-demo".to_string(),
                environment: "Production".to_string(),
                timestamp: now,
            },
            table_metrics,
            dependency_map,
            historical_baseline_7d: baselines,
            pipeline_events,
            recent_code_commits,
            alert_history: Vec::new(),
            sla_definitions: BTreeMap::new(),
        }
    }
}

impl Observer for DemoObserver {
    fn observe(&self) -> Result<ObservationPackage, PerceptixError> {
        let started = Instant::now();
        if self.simulate_failure {
            error!("Observer failure simulation active");
            return Err(PerceptixError::Observer(
                "simulated connector failure".to_string(),
            ));
        }

        let state = self.build_state();
        state.validate()?;

        let ml_predictions = run_ml_predictions(&state);
        let rules_evaluation = evaluate_rules(&state);

        Ok(ObservationPackage {
            telemetry: Telemetry {
                trace_id: Uuid::new_v4().to_string(),
                latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                component: COMPONENT_ID.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            payload: state,
            ml_predictions: (!ml_predictions.is_empty()).then_some(ml_predictions),
            rules_evaluation: Some(rules_evaluation),
        })
    }

    fn name(&self) -> &str {
        "demo"
    }
}

/// Heuristic anomaly scoring stand-in for the trained detector: a table is
/// anomalous when a null rate blows past 5x its baseline or freshness is
/// past a day.
fn run_ml_predictions(state: &SystemState) -> HashMap<String, MlPrediction> {
    let mut predictions = HashMap::new();
    for (name, metric) in &state.table_metrics {
        let baseline_null = state
            .historical_baseline_7d
            .get(name)
            .map(|b| b.avg_attribution_null_rate)
            .unwrap_or(0.05);

        let worst_null = metric
            .null_rates
            .values()
            .copied()
            .fold(0.0_f64, f64::max);

        let null_anomaly = baseline_null > 0.0 && worst_null > baseline_null * 5.0;
        let freshness_anomaly = metric.freshness_minutes > 1440;
        let is_anomaly = null_anomaly || freshness_anomaly;

        let confidence = if is_anomaly {
            (0.80 + worst_null * 0.19).min(0.99)
        } else {
            0.10
        };
        predictions.insert(
            name.clone(),
            MlPrediction {
                is_anomaly,
                confidence,
            },
        );
    }
    predictions
}

/// Declarative rule set. The demo ships one rule: attribution nulls in
/// orders_table above 0.5.
fn evaluate_rules(state: &SystemState) -> RulesEvaluation {
    let mut triggered_rules = Vec::new();
    if let Some(orders) = state.table_metrics.get("orders_table") {
        let rate = orders
            .null_rates
            .get("attribution_source")
            .copied()
            .unwrap_or(0.0);
        if rate > 0.5 {
            triggered_rules.push("orders_attribution_null_rate_gt_0.5".to_string());
        }
    }
    RulesEvaluation {
        triggered_count: triggered_rules.len() as u32,
        triggered_rules,
    }
}

#[cfg(test)]
pub mod tests_support {
    use super::*;

    /// Healthy-scenario observation with the side channels stripped, for
    /// tests that construct their own anomaly signals.
    pub fn healthy_package() -> ObservationPackage {
        let mut package = DemoObserver::new(DemoScenario::Healthy).observe().unwrap();
        package.ml_predictions = None;
        package.rules_evaluation = None;
        package
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_drift_scenario_shape() {
        let package = DemoObserver::new(DemoScenario::SchemaDrift).observe().unwrap();
        let orders = package.payload.table_metrics.get("orders_table").unwrap();
        assert_eq!(orders.null_rates["attribution_source"], 0.99);
        assert_eq!(package.payload.pipeline_events.len(), 1);
        assert!(package.payload.recent_code_commits[0]
            .message
            .contains("tracking_pixel_id"));

        // Side channels present and triggered.
        let rules = package.rules_evaluation.unwrap();
        assert_eq!(rules.triggered_count, 1);
        let ml = package.ml_predictions.unwrap();
        assert!(ml["orders_table"].is_anomaly);
        assert!(ml["orders_table"].confidence > 0.8);
    }

    #[test]
    fn test_freshness_stall_scenario_shape() {
        let package = DemoObserver::new(DemoScenario::FreshnessStall)
            .observe()
            .unwrap();
        let inventory = package.payload.table_metrics.get("inventory_table").unwrap();
        assert_eq!(inventory.freshness_minutes, 2880);
        assert!(package.payload.pipeline_events[0].is_failure_signal());
        let ml = package.ml_predictions.unwrap();
        assert!(ml["inventory_table"].is_anomaly);
    }

    #[test]
    fn test_healthy_scenario_has_no_signals() {
        let package = DemoObserver::new(DemoScenario::Healthy).observe().unwrap();
        assert_eq!(package.rules_evaluation.unwrap().triggered_count, 0);
        let ml = package.ml_predictions.unwrap();
        assert!(ml.values().all(|p| !p.is_anomaly));
    }

    #[test]
    fn test_simulated_failure_is_observer_error() {
        let err = DemoObserver::failing().observe().unwrap_err();
        assert!(matches!(err, PerceptixError::Observer(_)));
    }
}
