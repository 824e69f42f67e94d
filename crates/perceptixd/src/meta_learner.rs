//! Long-term pattern analysis over the incident history.
//!
//! Runs periodically (every Nth cycle) and mines the historian for recurring
//! incident types and repeat-offender services, producing a recommendation
//! for operators. Advisory only: a failed analysis is logged by the caller
//! and never affects the cycle.

use anyhow::Result;
use perceptix_common::{IncidentReport, MetaAnalysisReport, PatternInsight};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::historian::Historian;

const ANALYSIS_WINDOW: usize = 500;
const CULPRIT_CONFIDENCE_THRESHOLD: f64 = 80.0;

const SERVICE_KEYWORDS: [&str; 8] = [
    "checkout-service",
    "payment-service",
    "inventory-service",
    "user-service",
    "order-service",
    "notification-service",
    "analytics-service",
    "warehouse-service",
];

pub struct MetaLearner {
    historian: Arc<Historian>,
}

impl MetaLearner {
    pub fn new(historian: Arc<Historian>) -> Self {
        Self { historian }
    }

    /// Mine recent incidents for recurring patterns and systemic weaknesses.
    pub fn analyze_patterns(&self) -> Result<MetaAnalysisReport> {
        info!("Starting pattern analysis");
        let incidents = self.historian.list_incidents(ANALYSIS_WINDOW)?;

        let total_incidents = incidents.len() as u64;
        let most_frequent_type = most_frequent_type(&incidents);
        let culprits = extract_culprit_services(&incidents);

        let (culprit_service, frequency) = culprits
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(service, count)| (service.clone(), *count))
            .unwrap_or_else(|| ("None".to_string(), 0));

        let pattern_signature = if frequency > 0 {
            pattern_signature(&culprit_service, &most_frequent_type, total_incidents)
        } else {
            "Insufficient data for pattern detection".to_string()
        };

        let report = MetaAnalysisReport {
            period_analyzed: "Last 90 Days".to_string(),
            total_incidents,
            most_frequent_type,
            detected_pattern: PatternInsight {
                culprit_service: culprit_service.clone(),
                frequency,
                pattern_signature,
            },
            recommendation: recommendation(&culprit_service, frequency),
        };

        info!(
            "Analysis complete: {} incidents, culprit={}",
            total_incidents, culprit_service
        );
        Ok(report)
    }
}

fn most_frequent_type(incidents: &[IncidentReport]) -> String {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for incident in incidents {
        *counts.entry(incident.incident_type.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(kind, _)| kind.to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Services implicated in high-confidence incidents, counted per mention in
/// the root-cause analysis or evidence summary.
fn extract_culprit_services(incidents: &[IncidentReport]) -> HashMap<String, u64> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for incident in incidents {
        if incident.final_confidence_score <= CULPRIT_CONFIDENCE_THRESHOLD {
            continue;
        }
        let mut haystack = incident.root_cause_analysis.to_lowercase();
        for line in &incident.evidence_summary {
            haystack.push('\n');
            haystack.push_str(&line.to_lowercase());
        }
        for service in SERVICE_KEYWORDS {
            if haystack.contains(service) {
                *counts.entry(service.to_string()).or_default() += 1;
            }
        }
    }
    counts
}

fn pattern_signature(service: &str, most_frequent_type: &str, total: u64) -> String {
    if total > 5 {
        format!(
            "Repeated {} incidents following {} changes. Pattern observed across {} incidents.",
            most_frequent_type, service, total
        )
    } else if total > 0 {
        format!("{} incidents detected in {}.", most_frequent_type, service)
    } else {
        "No significant patterns detected yet.".to_string()
    }
}

fn recommendation(service: &str, frequency: u64) -> String {
    if frequency == 0 {
        return "RECOMMENDATION: Continue monitoring. Insufficient incident history \
                for pattern-based recommendations."
            .to_string();
    }
    if frequency >= 3 {
        format!(
            "CRITICAL RECOMMENDATION: Implement strict schema validation and integration \
             testing on '{}' deployments. This service has been implicated in {} \
             high-confidence incidents. Consider: 1) Pre-deployment schema compatibility \
             checks, 2) Automated rollback triggers, 3) Enhanced monitoring.",
            service, frequency
        )
    } else if frequency >= 2 {
        format!(
            "RECOMMENDATION: Review deployment procedures for '{}'. Multiple incidents \
             detected. Add pre-production validation checks.",
            service
        )
    } else {
        format!(
            "RECOMMENDATION: Monitor '{}' deployments closely. Pattern detected but not \
             yet statistically significant.",
            service
        )
    }
}
