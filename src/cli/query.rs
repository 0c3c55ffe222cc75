//! Read-only commands (validate, plan, status)

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use super::common::open_fleet;
use super::output::Output;
use crate::domain::{Config, DependencyValidator, Scope, Service, StartupPlan};
use crate::engine::{Fleet, ReconciledView};
use crate::runtime::Drift;
use crate::storage::{ExchangeFormat, FleetStore};

/// Validates the stored fleet, or a standalone file
pub fn validate(output: &Output, file: Option<&Path>) -> Result<()> {
    let (config, result) = match file {
        Some(path) => {
            output.verbose_ctx("validate", &format!("Reading {}", path.display()));
            let config = read_exchange(path, None)?;
            let result = DependencyValidator::new().validate(&config);
            (config, result)
        }
        None => {
            let (_, fleet) = open_fleet(output)?;
            let config = (*fleet.config()).clone();
            let result = fleet.validate_config(&config);
            (config, result)
        }
    };

    output.validation(&result);

    if !result.valid {
        bail!("Configuration is invalid: {} error(s)", result.errors.len());
    }

    if !output.is_json() {
        println!(
            "Configuration is valid ({} groups, {} services, {} warning(s))",
            config.groups.len(),
            config.service_count(),
            result.warnings.len()
        );
    }

    Ok(())
}

/// Prints a startup (or shutdown) plan
pub fn plan(output: &Output, scope: Scope, shutdown: bool) -> Result<()> {
    let (_, fleet) = open_fleet(output)?;
    let config = fleet.config();

    let result = fleet.validate_config(&config);
    if !result.valid {
        output.validation(&result);
        bail!("Cannot plan an invalid configuration; run 'fleet validate'");
    }

    let plan = fleet.plan_startup_order(&config, scope)?;
    output.verbose_ctx("plan", &format!("{} batches", plan.batches.len()));

    if output.is_json() {
        output.data(&serde_json::json!({
            "scope": plan.scope,
            "order": if shutdown { plan.shutdown_order() } else { plan.order.clone() },
            "batches": plan.batches,
            "deferred": plan.deferred,
        }));
        return Ok(());
    }

    print_plan(&config, &plan, shutdown);
    Ok(())
}

fn label(config: &Config, plan: &StartupPlan, id: &str) -> String {
    let name = match plan.scope {
        Scope::All | Scope::Application(_) => config.group_name(id),
        Scope::Group(_) | Scope::Service(_) => config.service_name(id),
    };
    if name == id {
        id.to_string()
    } else {
        format!("{} ({})", id, name)
    }
}

fn print_plan(config: &Config, plan: &StartupPlan, shutdown: bool) {
    if plan.is_empty() {
        println!("Nothing to plan for {}.", plan.scope);
        return;
    }

    if shutdown {
        println!("Shutdown order for {}:", plan.scope);
        for (i, id) in plan.shutdown_order().iter().enumerate() {
            println!("  {:>2}. {}", i + 1, label(config, plan, id));
        }
        return;
    }

    println!("Startup plan for {}:", plan.scope);
    for (i, batch) in plan.batches.iter().enumerate() {
        let names: Vec<String> = batch.iter().map(|id| label(config, plan, id)).collect();
        println!("  batch {}: {}", i + 1, names.join(", "));
    }

    for deferral in &plan.deferred {
        println!(
            "  deferred {} out of batch {} (conflicts with {})",
            deferral.id,
            deferral.batch + 1,
            deferral.conflicts_with
        );
    }
}

/// Shows reconciled runtime status of every service
pub async fn status(output: &Output, cached: bool) -> Result<()> {
    let (_, fleet) = open_fleet(output)?;

    let drift = if cached {
        Vec::new()
    } else {
        output.verbose_ctx("status", "Querying process collaborator");
        fleet.refresh().await.drift
    };
    let view = fleet.view();

    if output.is_json() {
        output.data(&serde_json::json!({
            "generation": view.generation,
            "stale": view.stale,
            "reconciledAt": view.reconciled_at,
            "lastError": view.last_error,
            "faults": view.faults,
            "drift": drift,
            "services": view.config.services().map(service_json).collect::<Vec<_>>(),
        }));
        return Ok(());
    }

    print_status(&fleet, &view, &drift);
    Ok(())
}

fn service_json(s: &Service) -> serde_json::Value {
    serde_json::json!({
        "id": s.id,
        "name": s.name,
        "groupId": s.group_id,
        "status": s.status,
        "healthStatus": s.health_status,
        "pid": s.pid,
        "port": s.observed_port,
        "startedAt": s.started_at,
        "stoppedAt": s.stopped_at,
    })
}

fn print_status(fleet: &Fleet, view: &ReconciledView, drift: &[Drift]) {
    let now = Utc::now();
    let config = &view.config;

    if config.service_count() == 0 {
        println!("No services defined. Add one with 'fleet service add'.");
        return;
    }

    println!(
        "{:<16} {:<16} {:<11} {:<8} {:<8} UPTIME",
        "GROUP", "SERVICE", "STATUS", "PID", "PORT"
    );
    println!("{}", "-".repeat(70));

    let order = fleet
        .current_plan()
        .map(|p| p.order.clone())
        .unwrap_or_else(|| config.groups.iter().map(|g| g.id.clone()).collect());

    for group_id in &order {
        let Some(group) = config.group(group_id) else {
            continue;
        };
        for s in &group.services {
            let pid = s.pid.map_or("-".to_string(), |p| p.to_string());
            let port = match (s.status.is_running(), s.observed_port) {
                (_, Some(port)) => port.to_string(),
                (true, None) => "unknown".to_string(),
                (false, None) => "-".to_string(),
            };
            let uptime = s
                .uptime(now)
                .map_or("-".to_string(), |secs| format!("{}s", secs));
            println!(
                "{:<16} {:<16} {:<11} {:<8} {:<8} {}",
                group.id,
                s.id,
                s.status.as_str(),
                pid,
                port,
                uptime
            );
        }
    }

    if !drift.is_empty() {
        println!();
        for d in drift {
            println!(
                "drift: {} was {}, observed {}",
                d.service_id,
                d.expected.as_str(),
                d.observed.as_str()
            );
        }
    }

    if view.stale {
        println!();
        match &view.last_error {
            Some(err) => println!("(stale) {}", err),
            None => println!("(stale) runtime view may be out of date"),
        }
        for fault in &view.faults {
            println!("  fault: {}", fault);
        }
    }
}

/// Reads a fleet file for `validate`/`import`, picking the format
pub fn read_exchange(path: &Path, format: Option<ExchangeFormat>) -> Result<Config> {
    let format = format
        .or_else(|| ExchangeFormat::from_path(path))
        .with_context(|| format!("Cannot tell the format of {}; pass --as", path.display()))?;
    FleetStore::import(path, format)
}
