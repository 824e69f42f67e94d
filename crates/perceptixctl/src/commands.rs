//! Command handlers for perceptixctl.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use perceptix_common::PerceptixConfig;
use perceptixd::historian::Historian;
use perceptixd::observer::{DemoObserver, DemoScenario};
use perceptixd::orchestrator::PerceptixSystem;
use perceptixd::remediation::RemediationEngine;
use std::sync::Arc;

fn open_historian(config: &PerceptixConfig) -> Result<Arc<Historian>> {
    Historian::open(&config.database.path)
        .with_context(|| format!("opening database at {}", config.database.path.display()))
        .map(Arc::new)
}

fn engine(config: &PerceptixConfig) -> Result<RemediationEngine> {
    let historian = open_historian(config)?;
    Ok(RemediationEngine::new(config, historian, None))
}

fn parse_scenario(scenario: Option<String>, simulate_failure: bool) -> DemoScenario {
    if simulate_failure {
        return DemoScenario::SchemaDrift;
    }
    match scenario.as_deref().map(str::to_ascii_uppercase).as_deref() {
        Some("SCHEMA") => DemoScenario::SchemaDrift,
        Some("FRESHNESS") | Some("INVENTORY") => DemoScenario::FreshnessStall,
        Some("HEALTHY") => DemoScenario::Healthy,
        Some(_) | None => DemoScenario::from_env(),
    }
}

pub async fn cycle(count: u64, scenario: Option<String>, simulate_failure: bool) -> Result<()> {
    let config = PerceptixConfig::load_default();
    let historian = open_historian(&config)?;
    let observer = Arc::new(DemoObserver::new(parse_scenario(scenario, simulate_failure)));
    let system = PerceptixSystem::new(config, observer, historian)?;

    for cycle_id in 1..=count {
        match system.run_cycle(cycle_id).await {
            Ok(Some(report)) => {
                println!(
                    "{} cycle {}: incident {} [{}] confidence {:.1}% ({})",
                    "✗".red(),
                    cycle_id,
                    report.report_id,
                    report.incident_type.as_str().yellow(),
                    report.final_confidence_score,
                    report.verification_status.as_str()
                );
                println!("  root cause: {}", report.root_cause_analysis);
            }
            Ok(None) => println!("{} cycle {}: healthy", "✓".green(), cycle_id),
            Err(e) => {
                println!("{} cycle {}: {}", "!".red(), cycle_id, e);
                break;
            }
        }
    }
    Ok(())
}

pub fn incidents(limit: usize) -> Result<()> {
    let config = PerceptixConfig::load_default();
    let historian = open_historian(&config)?;
    let incidents = historian.list_incidents(limit)?;

    if incidents.is_empty() {
        println!("No incidents on record.");
        return Ok(());
    }
    for report in incidents {
        println!(
            "{}  {}  {}  {:.1}%  {}",
            report.report_id.bold(),
            report.timestamp.format("%Y-%m-%d %H:%M:%S"),
            report.incident_type.as_str().yellow(),
            report.final_confidence_score,
            report.verification_status.as_str()
        );
        println!("    {}", report.root_cause_analysis);
    }
    Ok(())
}

pub fn playbooks() -> Result<()> {
    let config = PerceptixConfig::load_default();
    let engine = engine(&config)?;
    let names = engine.playbook_names();

    if names.is_empty() {
        println!(
            "No playbooks loaded from {}",
            config.remediation.playbook_dir.display()
        );
        return Ok(());
    }
    for name in names {
        if let Some(playbook) = engine.playbook(&name) {
            println!(
                "{}  ({} steps, {} rollback)",
                name.bold(),
                playbook.steps.len(),
                playbook.rollback.len()
            );
            if !playbook.description.is_empty() {
                println!("    {}", playbook.description);
            }
        }
    }
    Ok(())
}

pub fn approvals_list() -> Result<()> {
    let config = PerceptixConfig::load_default();
    let engine = engine(&config)?;
    let pending = engine.pending_approvals();

    if pending.is_empty() {
        println!("No pending approvals.");
        return Ok(());
    }
    for record in pending {
        println!(
            "{}  playbook={}  incident={}  expires={}",
            record.token_id.bold(),
            record.playbook_name.yellow(),
            record.incident_id,
            record.expires_at
        );
    }
    Ok(())
}

pub async fn approve(token: &str, approver: &str, comment: Option<&str>) -> Result<()> {
    let config = PerceptixConfig::load_default();
    let engine = engine(&config)?;
    if engine.approve_remediation(token, approver, comment).await {
        println!("{} approved and executed: {}", "✓".green(), token);
    } else {
        println!("{} approval failed for {}", "✗".red(), token);
    }
    Ok(())
}

pub fn reject(token: &str, rejector: &str, reason: Option<&str>) -> Result<()> {
    let config = PerceptixConfig::load_default();
    let engine = engine(&config)?;
    if engine.reject_remediation(token, rejector, reason) {
        println!("{} rejected: {}", "✓".green(), token);
    } else {
        println!("{} rejection failed for {}", "✗".red(), token);
    }
    Ok(())
}

pub fn status() -> Result<()> {
    let config = PerceptixConfig::load_default();
    let historian = open_historian(&config)?;
    let engine = RemediationEngine::new(&config, Arc::clone(&historian), None);

    println!("{}", "perceptixctl".bold());
    println!("  database:          {}", config.database.path.display());
    println!("  incidents:         {}", historian.incident_count()?);
    println!("  pending approvals: {}", engine.pending_approvals().len());
    println!("  playbooks loaded:  {}", engine.playbook_names().len());
    println!(
        "  provider:          {} ({})",
        config.api.provider, config.api.model_name
    );
    println!("  dry_run:           {}", config.remediation.dry_run);
    Ok(())
}
