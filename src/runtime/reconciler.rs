//! Folding live observations into a snapshot
//!
//! Reconciliation only ever writes the runtime overlay of a service
//! (status, pid, timestamps, observed port). Declarative fields and the
//! dependency graph pass through untouched.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use super::probe::LiveFacts;
use crate::domain::{Config, HealthStatus, ServiceStatus};

/// A service whose previous status disagrees with what was observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Drift {
    pub service_id: String,
    pub expected: ServiceStatus,
    pub observed: ServiceStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub snapshot: Config,
    pub drift: Vec<Drift>,
}

/// Action-initiated statuses waiting for their settle window to elapse
#[derive(Debug, Default)]
pub struct PendingActions {
    since: HashMap<String, DateTime<Utc>>,
}

impl PendingActions {
    pub fn begin(&mut self, service_id: &str, at: DateTime<Utc>) {
        self.since.insert(service_id.to_string(), at);
    }

    /// Returns true while the action on `service_id` is still settling
    pub fn is_settling(&self, service_id: &str, now: DateTime<Utc>, window: Duration) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        self.since
            .get(service_id)
            .is_some_and(|at| now - *at < window)
    }

    /// Forgets every action whose window has elapsed
    pub fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        self.since.retain(|_, at| now - *at < window);
    }

    pub fn len(&self) -> usize {
        self.since.len()
    }

    pub fn is_empty(&self) -> bool {
        self.since.is_empty()
    }
}

pub struct RuntimeReconciler {
    settle: Duration,
    pending: Mutex<PendingActions>,
}

impl RuntimeReconciler {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            pending: Mutex::new(PendingActions::default()),
        }
    }

    /// Records that a caller set a transient status on `service_id`
    pub fn begin_action(&self, service_id: &str, at: DateTime<Utc>) {
        self.pending.lock().begin(service_id, at);
    }

    /// Overlays `facts` onto `config`
    ///
    /// Services without a fact keep their previous enrichment. Calling this
    /// twice with the same facts and time yields the same snapshot.
    pub fn reconcile(&self, config: &Config, facts: &LiveFacts, now: DateTime<Utc>) -> Reconciled {
        let mut pending = self.pending.lock();
        let mut snapshot = config.clone();
        let mut drift = Vec::new();

        for group in &mut snapshot.groups {
            for service in &mut group.services {
                let Some(fact) = facts.get(&service.id) else {
                    continue;
                };

                let previous = service.status;
                let observed = if fact.running {
                    ServiceStatus::Running
                } else {
                    ServiceStatus::Stopped
                };

                let settling =
                    previous.is_transient() && pending.is_settling(&service.id, now, self.settle);
                if !settling {
                    service.status = observed;
                }

                if !previous.is_transient() && previous.is_running() != fact.running {
                    info!(
                        service = %service.id,
                        expected = previous.as_str(),
                        observed = observed.as_str(),
                        "runtime drift"
                    );
                    drift.push(Drift {
                        service_id: service.id.clone(),
                        expected: previous,
                        observed,
                    });
                }

                if fact.running {
                    let restarted = matches!((service.pid, fact.pid), (Some(old), Some(new)) if old != new);
                    if service.started_at.is_none() || restarted {
                        service.started_at = Some(now);
                    }
                    service.pid = fact.pid;
                    service.stopped_at = None;
                    service.observed_port = service.declared_port().or(fact.port);
                } else {
                    let was_up = service.pid.is_some()
                        || service.started_at.is_some()
                        || previous.is_running();
                    if was_up {
                        service.stopped_at = Some(now);
                    }
                    service.pid = None;
                    service.started_at = None;
                    service.observed_port = None;
                }

                if !service.has_health_check() {
                    service.health_status = HealthStatus::Unconfigured;
                }
            }
        }

        pending.prune(now, self.settle);

        Reconciled { snapshot, drift }
    }
}
