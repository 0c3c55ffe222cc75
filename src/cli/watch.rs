//! `fleet watch`: keep the runtime view fresh and follow edits to fleet.json

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;
use tracing::warn;

use super::common::open_fleet;
use super::output::Output;
use crate::domain::{Mutation, ServiceStatus};
use crate::engine::{Fleet, MutationOutcome};
use crate::storage::FleetStore;

pub async fn run(output: &Output, interval_ms: Option<u64>, auto_start: bool) -> Result<()> {
    let (project, fleet) = open_fleet(output)?;
    let fleet = Arc::new(fleet);
    let store = project.store();
    let interval = interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| project.config().project.poll.interval());

    if auto_start || fleet.config().settings.auto_start {
        let started = fleet.start_auto().await?;
        if !started.is_empty() {
            output.success(&format!("Auto-started: {}", started.join(", ")));
        }
    }

    let poller = fleet.spawn_poller(interval);

    let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
    let mut debouncer = new_debouncer(Duration::from_millis(500), move |res: DebounceEventResult| {
        let _ = tx.send(res);
    })
    .context("Failed to create file watcher")?;
    debouncer
        .watcher()
        .watch(&project.fleet_dir(), RecursiveMode::NonRecursive)
        .context("Failed to watch .fleet directory")?;

    output.success(&format!(
        "Watching {} (refresh every {}ms, Ctrl-C to stop)",
        project.root().display(),
        interval.as_millis()
    ));

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut last = statuses(&fleet);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(events) = rx.recv() => match events {
                Ok(events) => {
                    if events.iter().any(|e| e.path.ends_with("fleet.json")) {
                        reload(output, &fleet, &store);
                    }
                }
                Err(e) => warn!(error = ?e, "watch error"),
            },
            _ = ticker.tick() => {
                let now = statuses(&fleet);
                for (id, status) in &now {
                    if last.get(id) != Some(status) {
                        output.success(&format!("{}: {}", id, status.as_str()));
                    }
                }
                last = now;
            }
        }
    }

    poller.shutdown().await;
    output.success("Stopped watching");
    Ok(())
}

fn statuses(fleet: &Fleet) -> HashMap<String, ServiceStatus> {
    fleet
        .config()
        .services()
        .map(|s| (s.id.clone(), s.status))
        .collect()
}

/// Applies an external edit of fleet.json through the validator
fn reload(output: &Output, fleet: &Fleet, store: &FleetStore) {
    let edited = match store.read() {
        Ok(config) => config,
        Err(e) => {
            output.error(&format!("{:#}", e));
            return;
        }
    };

    if edited == fleet.config().declarative() {
        return;
    }

    match fleet.propose_mutation(Mutation::ReplaceConfig(edited)) {
        Ok(MutationOutcome::Committed { warnings, .. }) => {
            output.warnings(&warnings);
            output.success("Reloaded fleet.json");
        }
        Ok(MutationOutcome::Rejected(result)) => {
            output.error("fleet.json edit rejected; keeping the previous configuration");
            output.validation(&result);
        }
        Err(e) => output.error(&format!("{:#}", e)),
    }
}
