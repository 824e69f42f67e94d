//! Policy engine: adaptive automation routing for remediation.
//!
//! Policies live in the historian (table: policies) as JSON definitions and
//! are evaluated against every confirmed incident. A matching policy routes
//! the incident to a remediation playbook, optionally behind an approval
//! gate. Malformed or disabled policies are skipped, never fatal.

use perceptix_common::models::IncidentReport;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Match clause of a stored policy. All present conditions must hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyMatch {
    /// Incident type names; "*" matches everything. Empty means no filter.
    #[serde(default)]
    pub incident_types: Vec<String>,
    #[serde(default)]
    pub min_confidence: Option<f64>,
    /// Case-insensitive substrings matched against the root cause analysis.
    #[serde(default)]
    pub contains_any: Vec<String>,
}

/// Action clause of a stored policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyActionDef {
    pub playbook: String,
    #[serde(default)]
    pub require_approval: bool,
}

/// Stored automation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPolicy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "match")]
    pub matcher: PolicyMatch,
    pub action: PolicyActionDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Routing decision produced by a matching policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyAction {
    pub policy_id: String,
    pub playbook: String,
    pub require_approval: bool,
}

pub struct PolicyEngine;

impl PolicyEngine {
    /// Evaluate policies against an incident report, in stored order.
    /// Disabled policies and policies with an empty playbook are skipped.
    pub fn evaluate(policies: &[StoredPolicy], report: &IncidentReport) -> Vec<PolicyAction> {
        let mut actions = Vec::new();
        for policy in policies {
            if !policy.enabled {
                continue;
            }
            if !Self::matches(&policy.matcher, report) {
                continue;
            }
            let playbook = policy.action.playbook.trim();
            if playbook.is_empty() {
                warn!("Policy '{}' has no playbook; skipping", policy.name);
                continue;
            }
            actions.push(PolicyAction {
                policy_id: policy.id.clone(),
                playbook: playbook.to_string(),
                require_approval: policy.action.require_approval,
            });
        }
        actions
    }

    fn matches(matcher: &PolicyMatch, report: &IncidentReport) -> bool {
        let incident_type = report.incident_type.as_str();
        let confidence = report.final_confidence_score;

        if !matcher.incident_types.is_empty() {
            let allowed: Vec<&str> = matcher
                .incident_types
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .collect();
            if !allowed.contains(&"*") && !allowed.contains(&incident_type) {
                return false;
            }
        }

        if let Some(min_conf) = matcher.min_confidence {
            if confidence < min_conf {
                return false;
            }
        }

        if !matcher.contains_any.is_empty() {
            let haystack = report.root_cause_analysis.to_lowercase();
            if !matcher
                .contains_any
                .iter()
                .any(|n| !n.is_empty() && haystack.contains(&n.to_lowercase()))
            {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::tests_support::sample_report;

    fn policy(id: &str, matcher: PolicyMatch, require_approval: bool) -> StoredPolicy {
        StoredPolicy {
            id: id.to_string(),
            name: format!("policy-{}", id),
            enabled: true,
            matcher,
            action: PolicyActionDef {
                playbook: "Fix Schema Mismatch".to_string(),
                require_approval,
            },
            rationale: None,
        }
    }

    #[test]
    fn test_incident_type_match() {
        let report = sample_report();
        let policies = vec![policy(
            "p1",
            PolicyMatch {
                incident_types: vec!["SCHEMA_CHANGE".to_string()],
                ..Default::default()
            },
            true,
        )];
        let actions = PolicyEngine::evaluate(&policies, &report);
        assert_eq!(actions.len(), 1);
        assert!(actions[0].require_approval);
    }

    #[test]
    fn test_wildcard_matches_everything() {
        let report = sample_report();
        let policies = vec![policy(
            "p1",
            PolicyMatch {
                incident_types: vec!["*".to_string()],
                ..Default::default()
            },
            false,
        )];
        assert_eq!(PolicyEngine::evaluate(&policies, &report).len(), 1);
    }

    #[test]
    fn test_min_confidence_gate() {
        // Report confidence 99.0: 90 passes, and a 99.5 floor rejects.
        let report = sample_report();
        let pass = policy(
            "p1",
            PolicyMatch {
                min_confidence: Some(90.0),
                ..Default::default()
            },
            false,
        );
        let reject = policy(
            "p2",
            PolicyMatch {
                min_confidence: Some(99.5),
                ..Default::default()
            },
            false,
        );
        let actions = PolicyEngine::evaluate(&[pass, reject], &report);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].policy_id, "p1");
    }

    #[test]
    fn test_below_min_confidence_yields_no_match() {
        let mut report = sample_report();
        report.final_confidence_score = 85.0;
        let policies = vec![policy(
            "p1",
            PolicyMatch {
                incident_types: vec!["SCHEMA_CHANGE".to_string()],
                min_confidence: Some(90.0),
                ..Default::default()
            },
            true,
        )];
        assert!(PolicyEngine::evaluate(&policies, &report).is_empty());
    }

    #[test]
    fn test_contains_any_is_case_insensitive() {
        let report = sample_report();
        let hit = policy(
            "p1",
            PolicyMatch {
                contains_any: vec!["ETL CONFIG".to_string()],
                ..Default::default()
            },
            false,
        );
        let miss = policy(
            "p2",
            PolicyMatch {
                contains_any: vec!["kafka".to_string()],
                ..Default::default()
            },
            false,
        );
        let actions = PolicyEngine::evaluate(&[hit, miss], &report);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].policy_id, "p1");
    }

    #[test]
    fn test_disabled_policies_are_skipped() {
        let report = sample_report();
        let mut p = policy("p1", PolicyMatch::default(), false);
        p.enabled = false;
        assert!(PolicyEngine::evaluate(&[p], &report).is_empty());
    }

    #[test]
    fn test_empty_playbook_is_skipped() {
        let report = sample_report();
        let mut p = policy("p1", PolicyMatch::default(), false);
        p.action.playbook = "   ".to_string();
        assert!(PolicyEngine::evaluate(&[p], &report).is_empty());
    }
}
