//! Alert fan-out for confirmed incidents.
//!
//! Channels are synchronous and best-effort: a channel that fails to deliver
//! is logged and skipped, it never fails the cycle. The async entry point
//! pushes the whole fan-out onto the blocking pool.

use chrono::Utc;
use perceptix_common::config::NotificationConfig;
use perceptix_common::{IncidentReport, VerificationStatus};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

// ===== ALERT LEVELS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Critical,
    High,
    Medium,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Critical => "CRITICAL",
            AlertLevel::High => "HIGH",
            AlertLevel::Medium => "MEDIUM",
        }
    }
}

/// Confirmed incidents at very high confidence page loudest; anything at or
/// above the acting threshold is HIGH; the rest is informational.
pub fn alert_level(report: &IncidentReport, confidence_threshold: f64) -> AlertLevel {
    if report.verification_status == VerificationStatus::Confirmed
        && report.final_confidence_score >= 90.0
    {
        AlertLevel::Critical
    } else if report.final_confidence_score >= confidence_threshold {
        AlertLevel::High
    } else {
        AlertLevel::Medium
    }
}

fn alert_payload(report: &IncidentReport, level: AlertLevel) -> Value {
    json!({
        "alert_level": level.as_str(),
        "report_id": report.report_id,
        "cycle_id": report.cycle_id,
        "incident_type": report.incident_type.as_str(),
        "verification_status": report.verification_status,
        "confidence": report.final_confidence_score,
        "trigger_signals": report.trigger_signals,
        "root_cause": report.root_cause_analysis,
        "recommended_actions": report.recommended_actions,
        "sent_at": Utc::now().to_rfc3339(),
    })
}

// ===== CHANNELS =====

pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    fn send(&self, report: &IncidentReport, level: AlertLevel) -> anyhow::Result<()>;
}

/// Writes a human-readable alert to the daemon log.
pub struct ConsoleChannel;

impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    fn send(&self, report: &IncidentReport, level: AlertLevel) -> anyhow::Result<()> {
        warn!(
            "[{}] {} incident {} (confidence {:.1}%): {}",
            level.as_str(),
            report.incident_type.as_str(),
            report.report_id,
            report.final_confidence_score,
            report.root_cause_analysis
        );
        Ok(())
    }
}

/// Appends one JSON object per alert to a file.
pub struct FileChannel {
    path: PathBuf,
}

impl FileChannel {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl NotificationChannel for FileChannel {
    fn name(&self) -> &str {
        "file"
    }

    fn send(&self, report: &IncidentReport, level: AlertLevel) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(&alert_payload(report, level))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Posts the alert to a Slack incoming webhook.
pub struct SlackChannel {
    webhook_url: String,
    client: reqwest::blocking::Client,
}

impl SlackChannel {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    fn send(&self, report: &IncidentReport, level: AlertLevel) -> anyhow::Result<()> {
        let emoji = match level {
            AlertLevel::Critical => ":rotating_light:",
            AlertLevel::High => ":warning:",
            AlertLevel::Medium => ":information_source:",
        };
        let text = format!(
            "{} *{} — {}*\nIncident `{}` (cycle {})\nConfidence: {:.1}%\nRoot cause: {}",
            emoji,
            level.as_str(),
            report.incident_type.as_str(),
            report.report_id,
            report.cycle_id,
            report.final_confidence_score,
            report.root_cause_analysis,
        );
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "text": text }))
            .send()?;
        if !response.status().is_success() {
            anyhow::bail!("Slack webhook returned {}", response.status());
        }
        Ok(())
    }
}

// ===== ESCALATOR =====

pub struct Escalator {
    channels: Arc<Vec<Box<dyn NotificationChannel>>>,
    confidence_threshold: f64,
}

impl Escalator {
    pub fn new(config: &NotificationConfig, confidence_threshold: f64) -> Self {
        let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();
        if config.console_enabled {
            channels.push(Box::new(ConsoleChannel));
        }
        if let Some(path) = &config.alert_file {
            channels.push(Box::new(FileChannel::new(path.clone())));
        }
        if let Some(url) = &config.slack_webhook_url {
            channels.push(Box::new(SlackChannel::new(url.clone())));
        }
        Self {
            channels: Arc::new(channels),
            confidence_threshold,
        }
    }

    #[cfg(test)]
    fn with_channels(channels: Vec<Box<dyn NotificationChannel>>, threshold: f64) -> Self {
        Self {
            channels: Arc::new(channels),
            confidence_threshold: threshold,
        }
    }

    /// Fan the alert out to every channel; returns per-channel delivery
    /// outcomes keyed by channel name.
    pub async fn escalate(&self, report: &IncidentReport) -> HashMap<String, bool> {
        let level = alert_level(report, self.confidence_threshold);
        info!(
            "Escalating incident {} at level {}",
            report.report_id,
            level.as_str()
        );

        let channels = Arc::clone(&self.channels);
        let report = report.clone();
        tokio::task::spawn_blocking(move || {
            let mut results = HashMap::new();
            for channel in channels.iter() {
                let ok = match channel.send(&report, level) {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Alert delivery failed on {}: {}", channel.name(), e);
                        false
                    }
                };
                results.insert(channel.name().to_string(), ok);
            }
            results
        })
        .await
        .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::tests_support::sample_report;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct RecordingChannel {
        sent: Mutex<Vec<AlertLevel>>,
    }

    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }
        fn send(&self, _report: &IncidentReport, level: AlertLevel) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(level);
            Ok(())
        }
    }

    struct FailingChannel;

    impl NotificationChannel for FailingChannel {
        fn name(&self) -> &str {
            "failing"
        }
        fn send(&self, _report: &IncidentReport, _level: AlertLevel) -> anyhow::Result<()> {
            anyhow::bail!("unreachable endpoint")
        }
    }

    #[test]
    fn test_alert_level_thresholds() {
        let mut report = sample_report();
        report.final_confidence_score = 99.0;
        assert_eq!(alert_level(&report, 85.0), AlertLevel::Critical);

        report.verification_status = VerificationStatus::WeakEvidence;
        assert_eq!(alert_level(&report, 85.0), AlertLevel::High);

        report.final_confidence_score = 60.0;
        assert_eq!(alert_level(&report, 85.0), AlertLevel::Medium);
    }

    #[tokio::test]
    async fn test_escalate_reports_per_channel_outcomes() {
        let escalator = Escalator::with_channels(
            vec![
                Box::new(RecordingChannel {
                    sent: Mutex::new(Vec::new()),
                }),
                Box::new(FailingChannel),
            ],
            85.0,
        );
        let results = escalator.escalate(&sample_report()).await;
        assert_eq!(results.get("recording"), Some(&true));
        assert_eq!(results.get("failing"), Some(&false));
    }

    #[tokio::test]
    async fn test_file_channel_appends_json_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.jsonl");
        let escalator = Escalator::with_channels(
            vec![Box::new(FileChannel::new(path.clone()))],
            85.0,
        );
        escalator.escalate(&sample_report()).await;
        escalator.escalate(&sample_report()).await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["alert_level"], "CRITICAL");
        assert_eq!(parsed["incident_type"], "SCHEMA_CHANGE");
    }
}
