//! Prometheus instrumentation for the cycle loop.
//!
//! All metrics hang off one `Registry` owned by `SystemMetrics`; components
//! record through the typed helpers rather than touching families directly.
//! `encode_text` renders the scrape payload, `summary` a JSON snapshot for
//! the status endpoint and CLI.

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use serde_json::{json, Value};

/// Cycle durations span sub-second healthy paths and multi-second LLM calls.
const CYCLE_BUCKETS: &[f64] = &[0.05, 0.25, 1.0, 5.0, 15.0, 60.0, 120.0];
const STAGE_BUCKETS: &[f64] = &[0.01, 0.05, 0.25, 1.0, 5.0, 30.0];

pub struct SystemMetrics {
    registry: Registry,

    cycles_total: IntCounter,
    cycle_errors_total: IntCounterVec,
    anomalies_detected_total: IntCounter,
    cycle_duration_seconds: HistogramVec,

    stage_duration_seconds: HistogramVec,
    stage_outcomes_total: CounterVec,

    verification_verdicts_total: IntCounterVec,
    llm_calls_total: IntCounterVec,
    llm_cache_hits_total: IntCounter,

    alerts_sent_total: IntCounterVec,
    remediations_total: IntCounterVec,
}

impl SystemMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let cycles_total =
            IntCounter::new("perceptix_cycles_total", "Observation cycles executed")?;
        registry.register(Box::new(cycles_total.clone()))?;

        let cycle_errors_total = IntCounterVec::new(
            Opts::new("perceptix_cycle_errors_total", "Cycles aborted by a fatal error"),
            &["stage"],
        )?;
        registry.register(Box::new(cycle_errors_total.clone()))?;

        let anomalies_detected_total = IntCounter::new(
            "perceptix_anomalies_detected_total",
            "Cycles in which at least one trigger fired",
        )?;
        registry.register(Box::new(anomalies_detected_total.clone()))?;

        let cycle_duration_seconds = HistogramVec::new(
            HistogramOpts::new("perceptix_cycle_duration_seconds", "Wall time per cycle")
                .buckets(CYCLE_BUCKETS.to_vec()),
            &["outcome"],
        )?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        let stage_duration_seconds = HistogramVec::new(
            HistogramOpts::new("perceptix_stage_duration_seconds", "Wall time per cycle stage")
                .buckets(STAGE_BUCKETS.to_vec()),
            &["stage"],
        )?;
        registry.register(Box::new(stage_duration_seconds.clone()))?;

        let stage_outcomes_total = CounterVec::new(
            Opts::new("perceptix_stage_outcomes_total", "Stage completions by outcome"),
            &["stage", "outcome"],
        )?;
        registry.register(Box::new(stage_outcomes_total.clone()))?;

        let verification_verdicts_total = IntCounterVec::new(
            Opts::new(
                "perceptix_verification_verdicts_total",
                "Verification verdicts by status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(verification_verdicts_total.clone()))?;

        let llm_calls_total = IntCounterVec::new(
            Opts::new("perceptix_llm_calls_total", "Model calls by stage and source"),
            &["stage", "source"],
        )?;
        registry.register(Box::new(llm_calls_total.clone()))?;

        let llm_cache_hits_total = IntCounter::new(
            "perceptix_llm_cache_hits_total",
            "Model calls answered from the response cache",
        )?;
        registry.register(Box::new(llm_cache_hits_total.clone()))?;

        let alerts_sent_total = IntCounterVec::new(
            Opts::new("perceptix_alerts_sent_total", "Alerts delivered by level"),
            &["level"],
        )?;
        registry.register(Box::new(alerts_sent_total.clone()))?;

        let remediations_total = IntCounterVec::new(
            Opts::new("perceptix_remediations_total", "Remediation attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(remediations_total.clone()))?;

        Ok(Self {
            registry,
            cycles_total,
            cycle_errors_total,
            anomalies_detected_total,
            cycle_duration_seconds,
            stage_duration_seconds,
            stage_outcomes_total,
            verification_verdicts_total,
            llm_calls_total,
            llm_cache_hits_total,
            alerts_sent_total,
            remediations_total,
        })
    }

    // ===== CYCLE =====

    pub fn record_cycle(&self, duration_secs: f64, outcome: &str, had_anomaly: bool) {
        self.cycles_total.inc();
        self.cycle_duration_seconds
            .with_label_values(&[outcome])
            .observe(duration_secs);
        if had_anomaly {
            self.anomalies_detected_total.inc();
        }
    }

    pub fn record_cycle_error(&self, stage: &str) {
        self.cycle_errors_total.with_label_values(&[stage]).inc();
    }

    pub fn record_stage(&self, stage: &str, duration_secs: f64, success: bool) {
        self.stage_duration_seconds
            .with_label_values(&[stage])
            .observe(duration_secs);
        let outcome = if success { "success" } else { "failure" };
        self.stage_outcomes_total
            .with_label_values(&[stage, outcome])
            .inc();
    }

    // ===== REASONING =====

    pub fn record_llm_call(&self, stage: &str, api_used: bool, cache_hit: bool) {
        if cache_hit {
            self.llm_cache_hits_total.inc();
        }
        let source = if cache_hit {
            "cache"
        } else if api_used {
            "api"
        } else {
            "fallback"
        };
        self.llm_calls_total.with_label_values(&[stage, source]).inc();
    }

    pub fn record_verdict(&self, status: &str) {
        self.verification_verdicts_total
            .with_label_values(&[status])
            .inc();
    }

    // ===== OUTPUT PATHS =====

    pub fn record_alert(&self, level: &str) {
        self.alerts_sent_total.with_label_values(&[level]).inc();
    }

    pub fn record_remediation(&self, outcome: &str) {
        self.remediations_total.with_label_values(&[outcome]).inc();
    }

    // ===== EXPORT =====

    /// Prometheus text exposition of every registered family.
    pub fn encode_text(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Compact JSON snapshot of the headline counters.
    pub fn summary(&self) -> Value {
        json!({
            "cycles_total": self.cycles_total.get(),
            "anomalies_detected_total": self.anomalies_detected_total.get(),
            "llm_cache_hits_total": self.llm_cache_hits_total.get(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_counters_accumulate() {
        let metrics = SystemMetrics::new().unwrap();
        metrics.record_cycle(0.2, "incident", true);
        metrics.record_cycle(0.1, "healthy", false);
        metrics.record_cycle(4.0, "incident", true);

        let summary = metrics.summary();
        assert_eq!(summary["cycles_total"], 3);
        assert_eq!(summary["anomalies_detected_total"], 2);
    }

    #[test]
    fn test_llm_call_sources() {
        let metrics = SystemMetrics::new().unwrap();
        metrics.record_llm_call("analysis", true, false);
        metrics.record_llm_call("analysis", false, true);
        metrics.record_llm_call("triage", false, false);

        assert_eq!(metrics.summary()["llm_cache_hits_total"], 1);
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("perceptix_llm_calls_total"));
        assert!(text.contains("source=\"fallback\""));
    }

    #[test]
    fn test_encode_text_includes_registered_families() {
        let metrics = SystemMetrics::new().unwrap();
        metrics.record_verdict("CONFIRMED");
        metrics.record_alert("CRITICAL");
        metrics.record_remediation("approval_pending");
        metrics.record_stage("observe", 0.01, true);
        metrics.record_cycle_error("persistence");

        let text = metrics.encode_text().unwrap();
        for family in [
            "perceptix_verification_verdicts_total",
            "perceptix_alerts_sent_total",
            "perceptix_remediations_total",
            "perceptix_stage_duration_seconds",
            "perceptix_cycle_errors_total",
        ] {
            assert!(text.contains(family), "missing {}", family);
        }
    }
}
