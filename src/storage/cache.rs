//! In-process cache of the last-known-good snapshot
//!
//! Readers clone an `Arc` and always see a whole snapshot. Writers take the
//! commit lock, build the next snapshot from the current one, and swap the
//! pointer in a single step.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::domain::{Config, StartupPlan};
use crate::runtime::ReconcileFault;

/// One committed version of the fleet plus reconciliation bookkeeping
#[derive(Debug, Clone, Default)]
pub struct CachedSnapshot {
    pub config: Arc<Config>,

    /// Bumped on every swap
    pub generation: u64,

    /// Fleet-wide startup plan of the last accepted configuration
    pub plan: Option<Arc<StartupPlan>>,

    /// Time of the last completed reconciliation pass
    pub reconciled_at: Option<DateTime<Utc>>,

    /// Set when the last refresh could not complete at all
    pub last_error: Option<String>,

    /// Per-service failures from the last reconciliation pass
    pub faults: Vec<ReconcileFault>,
}

impl CachedSnapshot {
    /// True when the runtime view should not be trusted as current
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        if self.last_error.is_some() || !self.faults.is_empty() {
            return true;
        }
        match self.reconciled_at {
            // A reconciliation stamped after `now` counts as fresh
            Some(at) => (now - at).to_std().is_ok_and(|age| age > max_age),
            None => true,
        }
    }
}

#[derive(Default)]
pub struct ConfigStore {
    current: RwLock<Arc<CachedSnapshot>>,
    commit: Mutex<()>,
}

impl ConfigStore {
    pub fn new(config: Config) -> Self {
        Self::with_plan(config, None)
    }

    pub fn with_plan(config: Config, plan: Option<StartupPlan>) -> Self {
        Self {
            current: RwLock::new(Arc::new(CachedSnapshot {
                config: Arc::new(config),
                plan: plan.map(Arc::new),
                ..CachedSnapshot::default()
            })),
            commit: Mutex::new(()),
        }
    }

    /// Returns the current snapshot
    pub fn snapshot(&self) -> Arc<CachedSnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.current.read().config)
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Takes the writer lock; held until the returned guard is dropped
    pub fn begin(&self) -> CommitGuard<'_> {
        CommitGuard {
            store: self,
            _lock: self.commit.lock(),
        }
    }

    fn swap(&self, next: CachedSnapshot) -> Arc<CachedSnapshot> {
        let next = Arc::new(next);
        *self.current.write() = Arc::clone(&next);
        next
    }
}

/// Exclusive write access to a [`ConfigStore`]
pub struct CommitGuard<'a> {
    store: &'a ConfigStore,
    _lock: MutexGuard<'a, ()>,
}

impl CommitGuard<'_> {
    /// The snapshot any commit through this guard builds on
    pub fn current(&self) -> Arc<CachedSnapshot> {
        self.store.snapshot()
    }

    /// Commits a new declarative configuration and its plan
    ///
    /// Runtime observations of services that still exist are carried over,
    /// so a configuration edit never rolls back what reconciliation saw.
    pub fn commit_config(&self, mut config: Config, plan: StartupPlan) -> Arc<CachedSnapshot> {
        let current = self.current();
        config.adopt_runtime(&current.config);
        self.store.swap(CachedSnapshot {
            config: Arc::new(config),
            generation: current.generation + 1,
            plan: Some(Arc::new(plan)),
            ..(*current).clone()
        })
    }

    /// Replaces runtime fields set by a caller, such as a transient status
    pub fn commit_runtime(&self, config: Config) -> Arc<CachedSnapshot> {
        let current = self.current();
        self.store.swap(CachedSnapshot {
            config: Arc::new(config),
            generation: current.generation + 1,
            ..(*current).clone()
        })
    }

    /// Commits an enriched snapshot produced by reconciliation
    pub fn commit_reconciled(
        &self,
        config: Config,
        faults: Vec<ReconcileFault>,
        at: DateTime<Utc>,
    ) -> Arc<CachedSnapshot> {
        let current = self.current();
        self.store.swap(CachedSnapshot {
            config: Arc::new(config),
            generation: current.generation + 1,
            plan: current.plan.clone(),
            reconciled_at: Some(at),
            last_error: None,
            faults,
        })
    }

    /// Keeps the current snapshot but marks the refresh as failed
    pub fn record_error(&self, message: impl Into<String>) -> Arc<CachedSnapshot> {
        let current = self.current();
        self.store.swap(CachedSnapshot {
            last_error: Some(message.into()),
            generation: current.generation + 1,
            ..(*current).clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Scope, Service, ServiceGroup, ServiceStatus, StartupPlanner};

    fn plan(config: &Config) -> StartupPlan {
        StartupPlanner::plan(config, Scope::All).unwrap()
    }

    fn config() -> Config {
        let mut g = ServiceGroup::new("g", "G");
        g.services.push(Service::new("a", "A", "g", "/bin/a"));
        Config {
            groups: vec![g],
            ..Config::default()
        }
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let store = ConfigStore::new(config());
        let before = store.snapshot();

        let mut next = config();
        next.groups[0].name = "Renamed".to_string();
        let planned = plan(&next);
        store.begin().commit_config(next, planned);

        assert_eq!(before.config.groups[0].name, "G");
        assert_eq!(store.config().groups[0].name, "Renamed");
        assert_eq!(store.generation(), before.generation + 1);
        assert!(before.plan.is_none());
        assert_eq!(store.snapshot().plan.as_ref().unwrap().order, vec!["g"]);
    }

    #[test]
    fn commit_config_keeps_runtime_overlay() {
        let store = ConfigStore::new(config());
        let now = Utc::now();

        let mut enriched = config();
        enriched.service_mut("a").unwrap().pid = Some(42);
        store.begin().commit_reconciled(enriched, vec![], now);

        let mut edited = config();
        edited.service_mut("a").unwrap().path = "/opt/a".to_string();
        let planned = plan(&edited);
        let committed = store.begin().commit_config(edited, planned);

        let a = committed.config.service("a").unwrap();
        assert_eq!(a.pid, Some(42));
        assert_eq!(a.path, "/opt/a");
        assert_eq!(committed.reconciled_at, Some(now));
    }

    #[test]
    fn commit_runtime_keeps_bookkeeping() {
        let store = ConfigStore::new(config());
        let now = Utc::now();
        let guard = store.begin();
        guard.commit_reconciled(config(), vec![], now);

        let mut starting = config();
        starting.service_mut("a").unwrap().status = ServiceStatus::Starting;
        let committed = guard.commit_runtime(starting);

        assert_eq!(committed.config.service("a").unwrap().status, ServiceStatus::Starting);
        assert_eq!(committed.reconciled_at, Some(now));
    }

    #[test]
    fn staleness() {
        let store = ConfigStore::new(config());
        let now = Utc::now();
        let max_age = Duration::from_secs(15);

        assert!(store.snapshot().is_stale(now, max_age));

        let guard = store.begin();
        guard.commit_reconciled(config(), vec![], now);
        assert!(!store.snapshot().is_stale(now, max_age));
        assert!(store
            .snapshot()
            .is_stale(now + chrono::Duration::seconds(16), max_age));

        let failed = guard.record_error("collaborator down");
        assert!(failed.is_stale(now, max_age));
        assert_eq!(failed.reconciled_at, Some(now));
    }

    #[test]
    fn faults_mark_view_stale() {
        let store = ConfigStore::new(config());
        let now = Utc::now();
        let snap = store.begin().commit_reconciled(
            config(),
            vec![ReconcileFault {
                service_id: "a".to_string(),
                message: "unreachable".to_string(),
            }],
            now,
        );
        assert!(snap.is_stale(now, Duration::from_secs(60)));
    }
}
