//! The fleet engine
//!
//! [`Fleet`] wires the validator, planner, snapshot cache, reconciler and
//! collaborators together. It is the only entry point callers (the CLI, an
//! embedding UI) need.
//!
//! Two kinds of writes reach the snapshot:
//!
//! - mutations, which are validated against the prospective configuration
//!   and persisted before they are committed
//! - reconciliation, which folds live facts into whatever snapshot is
//!   current at merge time and skips validation

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{
    Config, DependencyValidator, Mutation, Scope, Service, ServiceStatus, StartupPlan,
    StartupPlanner, ValidationIssue, ValidationResult, ValidatorOptions,
};
use crate::runtime::{
    gather_facts, spawn_poller, Drift, PollerHandle, ProcessCollaborator, ReconcileFault,
    RuntimeReconciler,
};
use crate::storage::{CachedSnapshot, ConfigRepository, ConfigStore, Project, ProjectConfig};

/// Tuning knobs for a [`Fleet`]
#[derive(Debug, Clone)]
pub struct FleetOptions {
    pub validator: ValidatorOptions,
    pub settle: Duration,
    pub stale_after: Duration,
}

impl Default for FleetOptions {
    fn default() -> Self {
        ProjectConfig::default().into()
    }
}

impl From<ProjectConfig> for FleetOptions {
    fn from(config: ProjectConfig) -> Self {
        Self {
            validator: config.planner.validator_options(),
            settle: config.poll.settle(),
            stale_after: config.poll.stale_after(),
        }
    }
}

/// Result of proposing a [`Mutation`]
#[derive(Debug, Clone)]
pub enum MutationOutcome {
    /// The change was persisted and is now the current snapshot
    Committed {
        config: Arc<Config>,
        warnings: Vec<ValidationIssue>,
    },
    /// The change was refused; the previous snapshot is untouched
    Rejected(ValidationResult),
}

impl MutationOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, MutationOutcome::Committed { .. })
    }
}

/// Snapshot as seen by readers, with its freshness
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledView {
    pub config: Arc<Config>,
    pub generation: u64,
    pub stale: bool,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub faults: Vec<ReconcileFault>,
}

/// What one reconciliation pass changed
#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub snapshot: Arc<CachedSnapshot>,
    pub drift: Vec<Drift>,
}

pub struct Fleet {
    store: ConfigStore,
    repository: Arc<dyn ConfigRepository>,
    collaborator: Arc<dyn ProcessCollaborator>,
    validator: DependencyValidator,
    reconciler: RuntimeReconciler,
    stale_after: Duration,
}

impl Fleet {
    /// Loads the configuration and last runtime overlay from `repository`
    ///
    /// An invalid stored configuration is still loaded, so it can be
    /// repaired through mutations, but no plan is cached for it.
    pub fn new(
        repository: Arc<dyn ConfigRepository>,
        collaborator: Arc<dyn ProcessCollaborator>,
        options: FleetOptions,
    ) -> Result<Self> {
        let mut config = repository
            .load_config()
            .context("Failed to load fleet configuration")?;

        match repository.load_overlay() {
            Ok(overlay) => config.apply_overlay(&overlay),
            Err(e) => warn!(error = %format!("{:#}", e), "ignoring unreadable runtime state"),
        }

        let validator = DependencyValidator::with_options(options.validator);
        let result = validator.validate(&config);
        let plan = if result.valid {
            StartupPlanner::plan(&config, Scope::All).ok()
        } else {
            warn!(errors = result.errors.len(), "stored configuration is invalid");
            None
        };

        Ok(Self {
            store: ConfigStore::with_plan(config, plan),
            repository,
            collaborator,
            validator,
            reconciler: RuntimeReconciler::new(options.settle),
            stale_after: options.stale_after,
        })
    }

    /// Opens the fleet of a project with the local process collaborator
    pub fn for_project(project: &Project) -> Result<Self> {
        Self::new(
            Arc::new(project.store()),
            Arc::new(project.probe()),
            project.config().project.clone().into(),
        )
    }

    pub fn validate_config(&self, config: &Config) -> ValidationResult {
        self.validator.validate(config)
    }

    pub fn plan_startup_order(
        &self,
        config: &Config,
        scope: Scope,
    ) -> Result<StartupPlan, crate::domain::PlannerError> {
        StartupPlanner::plan(config, scope)
    }

    /// Current snapshot without any freshness check
    pub fn config(&self) -> Arc<Config> {
        self.store.config()
    }

    /// Fleet-wide plan of the last accepted configuration
    pub fn current_plan(&self) -> Option<Arc<StartupPlan>> {
        self.store.snapshot().plan.clone()
    }

    /// Cached view; never touches the collaborator
    pub fn view(&self) -> ReconciledView {
        let snapshot = self.store.snapshot();
        ReconciledView {
            config: Arc::clone(&snapshot.config),
            generation: snapshot.generation,
            stale: snapshot.is_stale(Utc::now(), self.stale_after),
            reconciled_at: snapshot.reconciled_at,
            last_error: snapshot.last_error.clone(),
            faults: snapshot.faults.clone(),
        }
    }

    /// Cached view, refreshed first when it is stale
    pub async fn reconciled_snapshot(&self) -> ReconciledView {
        if self.store.snapshot().is_stale(Utc::now(), self.stale_after) {
            self.refresh().await;
        }
        self.view()
    }

    /// Validates, plans, persists and commits a change
    ///
    /// `Err` is reserved for persistence failures and planner contract
    /// violations. In every non-committed case the prior snapshot is kept.
    pub fn propose_mutation(&self, mutation: Mutation) -> Result<MutationOutcome> {
        let description = mutation.describe();
        let guard = self.store.begin();
        let current = guard.current();

        let candidate = match mutation.apply(&current.config, Utc::now()) {
            Ok(candidate) => candidate,
            Err(e) => {
                info!(mutation = %description, error = %e, "mutation rejected");
                return Ok(MutationOutcome::Rejected(e.into_rejection()));
            }
        };

        let result = self.validator.validate(&candidate);
        if !result.valid {
            info!(
                mutation = %description,
                errors = result.errors.len(),
                first = %result.errors.first().map(|e| e.message.as_str()).unwrap_or(""),
                "mutation rejected"
            );
            return Ok(MutationOutcome::Rejected(result));
        }

        let plan = StartupPlanner::plan(&candidate, Scope::All)
            .with_context(|| format!("Failed to plan after {}", description))?;

        self.repository
            .persist_config(&candidate)
            .with_context(|| format!("Failed to persist {}", description))?;

        let committed = guard.commit_config(candidate, plan);
        debug!(mutation = %description, generation = committed.generation, "mutation committed");

        Ok(MutationOutcome::Committed {
            config: Arc::clone(&committed.config),
            warnings: result.warnings,
        })
    }

    /// Runs one reconciliation pass
    pub async fn refresh(&self) -> RefreshReport {
        let token = CancellationToken::new();
        match self.refresh_with_token(&token).await {
            Some(report) => report,
            None => RefreshReport {
                snapshot: self.store.snapshot(),
                drift: Vec::new(),
            },
        }
    }

    /// Runs one reconciliation pass unless `token` is cancelled first
    ///
    /// Facts are merged into the snapshot that is current at merge time, so
    /// a mutation committed while the collaborator was being queried is
    /// never overwritten. Returns `None` when the results were discarded.
    pub async fn refresh_with_token(&self, token: &CancellationToken) -> Option<RefreshReport> {
        let base = self.store.snapshot();
        let (facts, faults) = gather_facts(Arc::clone(&self.collaborator), &base.config).await;

        if token.is_cancelled() {
            debug!("discarding facts from cancelled refresh");
            return None;
        }

        let now = Utc::now();
        let guard = self.store.begin();
        let current = guard.current();

        if facts.is_empty() && !faults.is_empty() {
            let message = format!(
                "Process collaborator unavailable for all {} services: {}",
                faults.len(),
                faults[0].message
            );
            warn!(error = %message, "refresh failed");
            return Some(RefreshReport {
                snapshot: guard.record_error(message),
                drift: Vec::new(),
            });
        }

        if current.generation != base.generation {
            debug!(
                read = base.generation,
                current = current.generation,
                "snapshot changed during refresh, merging into newer snapshot"
            );
        }

        let reconciled = self.reconciler.reconcile(&current.config, &facts, now);
        let committed = guard.commit_reconciled(reconciled.snapshot, faults, now);
        drop(guard);

        if let Err(e) = self.repository.persist_overlay(&committed.config.overlay()) {
            warn!(error = %format!("{:#}", e), "failed to persist runtime state");
        }

        Some(RefreshReport {
            snapshot: committed,
            drift: reconciled.drift,
        })
    }

    /// Sets a transient status and returns the service definition
    fn begin_action(&self, service_id: &str, status: ServiceStatus) -> Result<Service> {
        let now = Utc::now();
        let guard = self.store.begin();
        let mut next = (*guard.current().config).clone();

        let service = next
            .service_mut(service_id)
            .ok_or_else(|| anyhow!("Service not found: {}", service_id))?;
        service.status = status;
        let definition = service.clone();

        self.reconciler.begin_action(service_id, now);
        guard.commit_runtime(next);
        Ok(definition)
    }

    fn mark_failed(&self, service_id: &str) {
        let guard = self.store.begin();
        let mut next = (*guard.current().config).clone();
        if let Some(service) = next.service_mut(service_id) {
            service.status = ServiceStatus::Error;
            guard.commit_runtime(next);
        }
    }

    /// Asks the collaborator to start a service
    ///
    /// Completion is picked up by the next refresh.
    pub async fn start_service(&self, service_id: &str) -> Result<()> {
        let service = self.begin_action(service_id, ServiceStatus::Starting)?;
        info!(service = service_id, "starting");
        if let Err(e) = self.collaborator.start_service(&service).await {
            self.mark_failed(service_id);
            return Err(e).with_context(|| format!("Failed to start {}", service_id));
        }
        Ok(())
    }

    pub async fn stop_service(&self, service_id: &str) -> Result<()> {
        let service = self.begin_action(service_id, ServiceStatus::Stopping)?;
        info!(service = service_id, "stopping");
        if let Err(e) = self.collaborator.stop_service(&service).await {
            self.mark_failed(service_id);
            return Err(e).with_context(|| format!("Failed to stop {}", service_id));
        }
        Ok(())
    }

    pub async fn restart_service(&self, service_id: &str) -> Result<()> {
        let service = self.begin_action(service_id, ServiceStatus::Restarting)?;
        info!(service = service_id, "restarting");
        if let Err(e) = self.collaborator.restart_service(&service).await {
            self.mark_failed(service_id);
            return Err(e).with_context(|| format!("Failed to restart {}", service_id));
        }
        Ok(())
    }

    /// Starts a group's services in planned order
    ///
    /// The group's `startupDelay` is waited once up front and each service's
    /// own delay before it is launched. Services already running are skipped.
    /// Returns the IDs that were started.
    pub async fn start_group(&self, group_id: &str) -> Result<Vec<String>> {
        let config = self.config();
        let plan = self.plan_startup_order(&config, Scope::Group(group_id.to_string()))?;
        let group_delay = config.group(group_id).map_or(0, |g| g.startup_delay);

        sleep_ms(group_delay).await;

        let mut started = Vec::new();
        for service_id in &plan.order {
            let Some(service) = config.service(service_id) else {
                continue;
            };
            if service.status.is_running() {
                debug!(service = %service_id, "already running");
                continue;
            }
            sleep_ms(service.startup_delay).await;
            self.start_service(service_id).await?;
            started.push(service_id.clone());
        }

        Ok(started)
    }

    /// Stops a group's services in reverse planned order
    pub async fn stop_group(&self, group_id: &str) -> Result<Vec<String>> {
        let config = self.config();
        let plan = self.plan_startup_order(&config, Scope::Group(group_id.to_string()))?;

        let mut stopped = Vec::new();
        for service_id in plan.shutdown_order() {
            let running = config
                .service(&service_id)
                .is_some_and(|s| s.status.is_running() || s.pid.is_some());
            if !running {
                continue;
            }
            self.stop_service(&service_id).await?;
            stopped.push(service_id);
        }

        Ok(stopped)
    }

    /// Starts every `autoStart` service, groups in fleet-wide order
    pub async fn start_auto(&self) -> Result<Vec<String>> {
        let config = self.config();
        let groups = self.plan_startup_order(&config, Scope::All)?;

        let mut started = Vec::new();
        for group_id in &groups.order {
            let plan = self.plan_startup_order(&config, Scope::Group(group_id.clone()))?;
            for service_id in &plan.order {
                let Some(service) = config.service(service_id) else {
                    continue;
                };
                if !service.auto_start || service.status.is_running() {
                    continue;
                }
                sleep_ms(service.startup_delay).await;
                self.start_service(service_id).await?;
                started.push(service_id.clone());
            }
        }

        Ok(started)
    }

    /// Refreshes every `interval` in the background
    ///
    /// The poller holds only a weak reference and stops once the fleet is
    /// dropped.
    pub fn spawn_poller(self: &Arc<Self>, interval: Duration) -> PollerHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        spawn_poller(interval, CancellationToken::new(), move |token| {
            let weak = weak.clone();
            async move {
                let Some(fleet) = weak.upgrade() else {
                    return false;
                };
                fleet.refresh_with_token(&token).await;
                true
            }
        })
    }
}

async fn sleep_ms(ms: i64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms as u64)).await;
    }
}
