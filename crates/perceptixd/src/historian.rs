//! SQLite-backed persistence for incidents, metrics, policies, approvals
//! and remediation executions.
//!
//! Incidents are stored with a few queryable columns plus the full report as
//! JSON, so the data model can evolve without migrations. Policy definitions
//! are JSON too; malformed rows are skipped on read, never fatal.

use crate::policy::StoredPolicy;
use crate::remediation::executor::PlaybookExecution;
use anyhow::{Context, Result};
use perceptix_common::models::IncidentReport;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Stored approval request row.
#[derive(Debug, Clone)]
pub struct ApprovalRecord {
    pub token_id: String,
    pub tenant_id: Option<String>,
    pub incident_id: String,
    pub playbook_name: String,
    pub status: String,
    pub requested_at: String,
    pub expires_at: String,
    pub requested_by: String,
    pub approved_by: Option<String>,
    pub comment: Option<String>,
    pub context: HashMap<String, String>,
    pub details: Value,
}

pub struct Historian {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl Historian {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;
        let historian = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };
        historian.init_schema()?;
        info!("Historian database ready at {}", path.display());
        Ok(historian)
    }

    /// In-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let historian = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: PathBuf::from(":memory:"),
        };
        historian.init_schema()?;
        Ok(historian)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                report_id TEXT PRIMARY KEY,
                tenant_id TEXT,
                timestamp TEXT NOT NULL,
                cycle_id INTEGER NOT NULL,
                incident_type TEXT NOT NULL,
                status TEXT NOT NULL,
                confidence REAL NOT NULL,
                root_cause TEXT,
                full_json TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                value REAL NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS policies (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 0,
                definition TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS remediation_approvals (
                token_id TEXT PRIMARY KEY,
                tenant_id TEXT,
                incident_id TEXT NOT NULL,
                playbook_name TEXT NOT NULL,
                status TEXT NOT NULL,
                requested_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                requested_by TEXT NOT NULL,
                approved_by TEXT,
                comment TEXT,
                context_json TEXT NOT NULL DEFAULT '{}',
                details_json TEXT NOT NULL DEFAULT '{}'
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS remediation_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id TEXT,
                incident_id TEXT NOT NULL,
                playbook_name TEXT NOT NULL,
                success INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                execution_json TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                details_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_incidents_timestamp ON incidents(timestamp DESC)",
            [],
        )?;

        Ok(())
    }

    // ===== INCIDENTS =====

    pub fn save_incident(&self, report: &IncidentReport, tenant_id: Option<&str>) -> Result<()> {
        let full_json = serde_json::to_string(report).context("Failed to serialize report")?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO incidents
                (report_id, tenant_id, timestamp, cycle_id, incident_type, status, confidence, root_cause, full_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                report.report_id,
                tenant_id,
                report.timestamp.to_rfc3339(),
                report.cycle_id as i64,
                report.incident_type.as_str(),
                report.status,
                report.final_confidence_score,
                report.root_cause_analysis,
                full_json,
            ],
        )
        .context("Failed to save incident")?;
        Ok(())
    }

    pub fn get_incident(&self, report_id: &str) -> Result<Option<IncidentReport>> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row(
                "SELECT full_json FROM incidents WHERE report_id = ?1",
                params![report_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Recent incidents, newest first. Rows with unparseable JSON are skipped.
    pub fn list_incidents(&self, limit: usize) -> Result<Vec<IncidentReport>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT full_json FROM incidents ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
        let mut incidents = Vec::new();
        for raw in rows {
            let raw = raw?;
            match serde_json::from_str(&raw) {
                Ok(report) => incidents.push(report),
                Err(e) => warn!("Skipping unparseable incident row: {}", e),
            }
        }
        Ok(incidents)
    }

    /// External status transition; the only mutation permitted on a stored
    /// incident.
    pub fn archive_incident(&self, report_id: &str) -> Result<bool> {
        let report = match self.get_incident(report_id)? {
            Some(r) => r,
            None => return Ok(false),
        };
        let mut archived = report;
        archived.status = "ARCHIVED".to_string();
        let full_json = serde_json::to_string(&archived)?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE incidents SET status = 'ARCHIVED', full_json = ?1 WHERE report_id = ?2",
            params![full_json, report_id],
        )?;
        Ok(changed > 0)
    }

    pub fn incident_count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ===== METRICS =====

    pub fn save_metric(&self, name: &str, value: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO metrics (name, value, recorded_at) VALUES (?1, ?2, ?3)",
            params![name, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ===== POLICIES =====

    pub fn upsert_policy(&self, policy: &StoredPolicy) -> Result<()> {
        let definition = serde_json::to_string(policy)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO policies (id, name, enabled, definition, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                enabled = excluded.enabled,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
            params![
                policy.id,
                policy.name,
                policy.enabled as i64,
                definition,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn delete_policy(&self, policy_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM policies WHERE id = ?1", params![policy_id])?;
        Ok(changed > 0)
    }

    pub fn list_policies(&self, enabled_only: bool) -> Result<Vec<StoredPolicy>> {
        let conn = self.conn.lock().unwrap();
        let sql = if enabled_only {
            "SELECT definition FROM policies WHERE enabled = 1 ORDER BY name"
        } else {
            "SELECT definition FROM policies ORDER BY name"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut policies = Vec::new();
        for raw in rows {
            let raw = raw?;
            match serde_json::from_str::<StoredPolicy>(&raw) {
                Ok(policy) => policies.push(policy),
                Err(e) => warn!("Skipping malformed policy definition: {}", e),
            }
        }
        Ok(policies)
    }

    // ===== REMEDIATION APPROVALS =====

    pub fn create_remediation_approval(&self, record: &ApprovalRecord) -> Result<()> {
        let context_json = serde_json::to_string(&record.context)?;
        let details_json = serde_json::to_string(&record.details)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO remediation_approvals
                (token_id, tenant_id, incident_id, playbook_name, status, requested_at,
                 expires_at, requested_by, approved_by, comment, context_json, details_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                record.token_id,
                record.tenant_id,
                record.incident_id,
                record.playbook_name,
                record.status,
                record.requested_at,
                record.expires_at,
                record.requested_by,
                record.approved_by,
                record.comment,
                context_json,
                details_json,
            ],
        )?;
        Ok(())
    }

    pub fn get_remediation_approval(&self, token_id: &str) -> Result<Option<ApprovalRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT token_id, tenant_id, incident_id, playbook_name, status, requested_at,
                   expires_at, requested_by, approved_by, comment, context_json, details_json
            FROM remediation_approvals WHERE token_id = ?1
            "#,
        )?;
        let record = stmt
            .query_row(params![token_id], Self::row_to_approval)
            .optional()?;
        Ok(record)
    }

    pub fn list_pending_approvals(&self) -> Result<Vec<ApprovalRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT token_id, tenant_id, incident_id, playbook_name, status, requested_at,
                   expires_at, requested_by, approved_by, comment, context_json, details_json
            FROM remediation_approvals WHERE status = 'pending' ORDER BY requested_at
            "#,
        )?;
        let rows = stmt.query_map([], Self::row_to_approval)?;
        let mut approvals = Vec::new();
        for row in rows {
            approvals.push(row?);
        }
        Ok(approvals)
    }

    pub fn update_remediation_approval_status(
        &self,
        token_id: &str,
        status: &str,
        actor: Option<&str>,
        comment: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"
            UPDATE remediation_approvals
            SET status = ?1, approved_by = COALESCE(?2, approved_by), comment = COALESCE(?3, comment)
            WHERE token_id = ?4
            "#,
            params![status, actor, comment, token_id],
        )?;
        Ok(changed > 0)
    }

    fn row_to_approval(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApprovalRecord> {
        let context_json: String = row.get(10)?;
        let details_json: String = row.get(11)?;
        Ok(ApprovalRecord {
            token_id: row.get(0)?,
            tenant_id: row.get(1)?,
            incident_id: row.get(2)?,
            playbook_name: row.get(3)?,
            status: row.get(4)?,
            requested_at: row.get(5)?,
            expires_at: row.get(6)?,
            requested_by: row.get(7)?,
            approved_by: row.get(8)?,
            comment: row.get(9)?,
            context: serde_json::from_str(&context_json).unwrap_or_default(),
            details: serde_json::from_str(&details_json).unwrap_or(Value::Null),
        })
    }

    // ===== REMEDIATION EXECUTIONS =====

    #[allow(clippy::too_many_arguments)]
    pub fn record_remediation_execution(
        &self,
        tenant_id: Option<&str>,
        incident_id: &str,
        playbook_name: &str,
        success: bool,
        started_at: &str,
        finished_at: &str,
        execution: &PlaybookExecution,
    ) -> Result<()> {
        let execution_json = serde_json::to_string(execution)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO remediation_executions
                (tenant_id, incident_id, playbook_name, success, started_at, finished_at, execution_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                tenant_id,
                incident_id,
                playbook_name,
                success as i64,
                started_at,
                finished_at,
                execution_json,
            ],
        )?;
        Ok(())
    }

    // ===== AUDIT =====

    pub fn record_audit_event(
        &self,
        actor: &str,
        action: &str,
        entity_type: &str,
        entity_id: &str,
        details: &Value,
    ) -> Result<()> {
        let details_json = serde_json::to_string(details)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO audit_events (actor, action, entity_type, entity_id, details_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                actor,
                action,
                entity_type,
                entity_id,
                details_json,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyActionDef, PolicyMatch};
    use crate::verifier::tests_support::sample_report;
    use serde_json::json;

    #[test]
    fn test_save_and_load_incident_round_trip() {
        let historian = Historian::open_in_memory().unwrap();
        let report = sample_report();
        historian.save_incident(&report, None).unwrap();

        let loaded = historian.get_incident(&report.report_id).unwrap().unwrap();
        assert_eq!(loaded.report_id, report.report_id);
        assert_eq!(loaded.incident_type, report.incident_type);
        assert_eq!(loaded.final_confidence_score, 99.0);
        assert_eq!(historian.incident_count().unwrap(), 1);
    }

    #[test]
    fn test_archive_incident_changes_status_only() {
        let historian = Historian::open_in_memory().unwrap();
        let report = sample_report();
        historian.save_incident(&report, Some("tenant-a")).unwrap();

        assert!(historian.archive_incident(&report.report_id).unwrap());
        let archived = historian.get_incident(&report.report_id).unwrap().unwrap();
        assert_eq!(archived.status, "ARCHIVED");
        assert_eq!(archived.root_cause_analysis, report.root_cause_analysis);

        assert!(!historian.archive_incident("no-such-report").unwrap());
    }

    #[test]
    fn test_policy_round_trip_and_enabled_filter() {
        let historian = Historian::open_in_memory().unwrap();
        let enabled = StoredPolicy {
            id: "p1".to_string(),
            name: "route schema changes".to_string(),
            enabled: true,
            matcher: PolicyMatch {
                incident_types: vec!["SCHEMA_CHANGE".to_string()],
                min_confidence: Some(90.0),
                contains_any: Vec::new(),
            },
            action: PolicyActionDef {
                playbook: "Fix Schema Mismatch".to_string(),
                require_approval: true,
            },
            rationale: None,
        };
        let mut disabled = enabled.clone();
        disabled.id = "p2".to_string();
        disabled.enabled = false;

        historian.upsert_policy(&enabled).unwrap();
        historian.upsert_policy(&disabled).unwrap();

        assert_eq!(historian.list_policies(false).unwrap().len(), 2);
        let active = historian.list_policies(true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "p1");
        assert_eq!(active[0].matcher.min_confidence, Some(90.0));
    }

    #[test]
    fn test_approval_lifecycle_in_db() {
        let historian = Historian::open_in_memory().unwrap();
        let record = ApprovalRecord {
            token_id: "tok-1".to_string(),
            tenant_id: None,
            incident_id: "inc-1".to_string(),
            playbook_name: "Fix Schema Mismatch".to_string(),
            status: "pending".to_string(),
            requested_at: "2026-08-25T00:00:00Z".to_string(),
            expires_at: "2026-08-25T00:30:00Z".to_string(),
            requested_by: "system".to_string(),
            approved_by: None,
            comment: None,
            context: HashMap::new(),
            details: json!({"confidence": 99.0}),
        };
        historian.create_remediation_approval(&record).unwrap();

        assert_eq!(historian.list_pending_approvals().unwrap().len(), 1);
        assert!(historian
            .update_remediation_approval_status("tok-1", "approved", Some("oncall"), None)
            .unwrap());
        assert!(historian.list_pending_approvals().unwrap().is_empty());

        let loaded = historian.get_remediation_approval("tok-1").unwrap().unwrap();
        assert_eq!(loaded.status, "approved");
        assert_eq!(loaded.approved_by.as_deref(), Some("oncall"));
        assert_eq!(loaded.details["confidence"], 99.0);
    }

    #[test]
    fn test_metrics_and_audit_insert() {
        let historian = Historian::open_in_memory().unwrap();
        historian.save_metric("cycle_duration_ms", 1234.5).unwrap();
        historian
            .record_audit_event("system", "cycle_completed", "cycle", "42", &json!({}))
            .unwrap();
    }
}
