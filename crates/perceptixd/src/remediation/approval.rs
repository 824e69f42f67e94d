//! Approval gate for high-risk remediation actions.
//!
//! Tokens start PENDING and leave that state at most once, to APPROVED,
//! REJECTED, or EXPIRED. Expiry is lazy: it is applied on the next status
//! check or mutation after the deadline passes, so an approve() racing an
//! expired deadline loses.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token representing one approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalToken {
    pub token_id: String,
    pub action: String,
    pub details: Value,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_comment: Option<String>,
}

/// Manages the approval workflow for high-risk remediation actions.
pub struct ApprovalGate {
    timeout: Duration,
    tokens: Mutex<HashMap<String, ApprovalToken>>,
}

impl ApprovalGate {
    pub fn new(timeout_minutes: u64) -> Self {
        Self {
            timeout: Duration::minutes(timeout_minutes as i64),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Heuristic risk check: destructive action names, production targets,
    /// and large-scale operations all require a human.
    pub fn requires_approval(action: &str, params: &Value) -> bool {
        const HIGH_RISK_KEYWORDS: [&str; 8] = [
            "delete",
            "drop",
            "truncate",
            "remove",
            "destroy",
            "scale_down",
            "terminate",
            "kill",
        ];

        let action_lower = action.to_lowercase();
        if HIGH_RISK_KEYWORDS.iter().any(|k| action_lower.contains(k)) {
            return true;
        }

        if params
            .get("environment")
            .and_then(Value::as_str)
            .map(|e| e.eq_ignore_ascii_case("production"))
            .unwrap_or(false)
        {
            return true;
        }

        if params.get("count").and_then(Value::as_u64).unwrap_or(0) > 10 {
            return true;
        }

        false
    }

    pub fn request_approval(&self, action: &str, details: Value) -> ApprovalToken {
        let now = Utc::now();
        let token = ApprovalToken {
            token_id: Uuid::new_v4().to_string(),
            action: action.to_string(),
            details,
            requested_at: now,
            expires_at: now + self.timeout,
            status: ApprovalStatus::Pending,
            approved_by: None,
            approval_comment: None,
        };
        info!(
            "Approval requested for {} (token: {})",
            action, token.token_id
        );
        self.tokens
            .lock()
            .unwrap()
            .insert(token.token_id.clone(), token.clone());
        token
    }

    /// Current status; unknown tokens read as EXPIRED.
    pub fn check_approval(&self, token_id: &str) -> ApprovalStatus {
        let mut tokens = self.tokens.lock().unwrap();
        match tokens.get_mut(token_id) {
            None => ApprovalStatus::Expired,
            Some(token) => {
                if token.status == ApprovalStatus::Pending && Utc::now() > token.expires_at {
                    token.status = ApprovalStatus::Expired;
                }
                token.status
            }
        }
    }

    pub fn approve(&self, token_id: &str, approver: &str, comment: Option<&str>) -> bool {
        self.transition(token_id, ApprovalStatus::Approved, approver, comment)
    }

    pub fn reject(&self, token_id: &str, rejector: &str, reason: Option<&str>) -> bool {
        self.transition(token_id, ApprovalStatus::Rejected, rejector, reason)
    }

    fn transition(
        &self,
        token_id: &str,
        target: ApprovalStatus,
        actor: &str,
        comment: Option<&str>,
    ) -> bool {
        let mut tokens = self.tokens.lock().unwrap();
        let token = match tokens.get_mut(token_id) {
            Some(t) => t,
            None => {
                error!("Approval token not found: {}", token_id);
                return false;
            }
        };

        if token.status != ApprovalStatus::Pending {
            error!(
                "Token not pending: {} (status: {})",
                token_id, token.status
            );
            return false;
        }
        if Utc::now() > token.expires_at {
            token.status = ApprovalStatus::Expired;
            error!("Token expired: {}", token_id);
            return false;
        }

        token.status = target;
        token.approved_by = Some(actor.to_string());
        token.approval_comment = comment.map(str::to_string);
        info!(
            "Action {}: {} by {}",
            target.as_str().to_lowercase(),
            token.action,
            actor
        );
        true
    }

    pub fn get(&self, token_id: &str) -> Option<ApprovalToken> {
        self.tokens.lock().unwrap().get(token_id).cloned()
    }

    /// All tokens still pending, expiring stale ones on the way.
    pub fn pending(&self) -> Vec<ApprovalToken> {
        let mut tokens = self.tokens.lock().unwrap();
        let now = Utc::now();
        tokens
            .values_mut()
            .filter_map(|token| {
                if token.status == ApprovalStatus::Pending && now > token.expires_at {
                    token.status = ApprovalStatus::Expired;
                }
                (token.status == ApprovalStatus::Pending).then(|| token.clone())
            })
            .collect()
    }

    /// Drop tokens that have expired, applying lazy expiry to stale PENDING
    /// ones first. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut tokens = self.tokens.lock().unwrap();
        let now = Utc::now();
        let before = tokens.len();
        tokens.retain(|_, token| {
            if token.status == ApprovalStatus::Pending && now > token.expires_at {
                token.status = ApprovalStatus::Expired;
            }
            token.status != ApprovalStatus::Expired
        });
        before - tokens.len()
    }

    /// Poll until the token leaves PENDING or `max_wait` elapses. Returns the
    /// final observed status.
    pub async fn wait_for_approval(
        &self,
        token_id: &str,
        max_wait: std::time::Duration,
    ) -> ApprovalStatus {
        let poll = std::time::Duration::from_millis(250);
        let deadline = std::time::Instant::now() + max_wait;
        loop {
            let status = self.check_approval(token_id);
            if status != ApprovalStatus::Pending || std::time::Instant::now() >= deadline {
                return status;
            }
            tokio::time::sleep(poll).await;
        }
    }
}
