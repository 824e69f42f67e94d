//! Trigger evaluation: turns one observation into a set of human-readable
//! anomaly signals. An empty set ends the cycle before any reasoning runs.

use perceptix_common::ObservationPackage;
use tracing::warn;

const ML_CONFIDENCE_FLOOR: f64 = 0.8;
const BASELINE_DRIFT_FACTOR: f64 = 5.0;
const FRESHNESS_LIMIT_MINUTES: u64 = 1440;
const SEVERE_NULL_RATE: f64 = 0.95;
const HIGH_NULL_RATE: f64 = 0.50;

/// Evaluate every trigger source against one observation. Table iteration is
/// over ordered maps and columns are sorted, so output order is stable.
pub fn evaluate_triggers(package: &ObservationPackage) -> Vec<String> {
    let mut triggers = Vec::new();
    let state = &package.payload;

    if let Some(rules) = &package.rules_evaluation {
        if rules.triggered_count > 0 {
            triggers.push("Custom Rules Triggered".to_string());
            warn!("Rules triggered: {:?}", rules.triggered_rules);
        }
    }

    if let Some(predictions) = &package.ml_predictions {
        let mut tables: Vec<&String> = predictions.keys().collect();
        tables.sort();
        for table in tables {
            let pred = &predictions[table];
            if pred.is_anomaly && pred.confidence > ML_CONFIDENCE_FLOOR {
                triggers.push(format!("ML Anomaly in {}", table));
            }
        }
    }

    for (table, metrics) in &state.table_metrics {
        if let Some(baseline) = state.historical_baseline_7d.get(table) {
            let current_null = metrics
                .null_rates
                .get("attribution_source")
                .copied()
                .unwrap_or(0.0);
            if baseline.avg_attribution_null_rate > 0.0
                && current_null > baseline.avg_attribution_null_rate * BASELINE_DRIFT_FACTOR
            {
                triggers.push(format!("Major Null Rate Drift in {}", table));
            }
        }

        if metrics.freshness_minutes > FRESHNESS_LIMIT_MINUTES {
            triggers.push(format!("Critical Freshness Violation in {}", table));
        }

        let mut columns: Vec<&String> = metrics.null_rates.keys().collect();
        columns.sort();
        for column in columns {
            let rate = metrics.null_rates[column];
            if rate >= SEVERE_NULL_RATE {
                triggers.push(format!("Severe Null Rate in {}.{}", table, column));
            } else if rate >= HIGH_NULL_RATE {
                triggers.push(format!("High Null Rate in {}.{}", table, column));
            }
        }
    }

    for event in &state.pipeline_events {
        if event.is_failure_signal() {
            let status = event.status.to_ascii_uppercase();
            let label = if status.is_empty() {
                event.severity.to_ascii_uppercase()
            } else {
                status
            };
            let pipeline = if event.pipeline.is_empty() {
                "pipeline"
            } else {
                &event.pipeline
            };
            triggers.push(format!("Pipeline Event: {} {}", pipeline, label).trim().to_string());
        }
    }

    triggers
}
