//! Process collaborator interface and fact gathering
//!
//! The core never launches or inspects processes itself. It asks a
//! [`ProcessCollaborator`] and folds the answers into [`LiveFacts`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::domain::{Config, Service};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Process collaborator unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed response from process collaborator: {0}")]
    Malformed(String),

    #[error("Failed to launch {id}: {message}")]
    Launch { id: String, message: String },

    #[error("Failed to signal {id}: {message}")]
    Signal { id: String, message: String },
}

/// Observation of one service at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LiveFact {
    pub running: bool,
    pub pid: Option<u32>,
    pub port: Option<u16>,
}

impl LiveFact {
    pub fn running(pid: u32, port: Option<u16>) -> Self {
        Self {
            running: true,
            pid: Some(pid),
            port,
        }
    }

    pub fn stopped() -> Self {
        Self::default()
    }
}

/// Live facts keyed by service ID
pub type LiveFacts = HashMap<String, LiveFact>;

/// A per-service failure to observe a process
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("{service_id}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct ReconcileFault {
    pub service_id: String,
    pub message: String,
}

/// Launches, stops and observes local processes
///
/// Actions are fire-and-forget: a successful return only means the request
/// was issued. Completion is observed later through `is_service_running`.
#[async_trait]
pub trait ProcessCollaborator: Send + Sync {
    async fn is_service_running(&self, service_id: &str) -> Result<bool, ProbeError>;

    async fn get_service_pid(&self, service_id: &str) -> Result<Option<u32>, ProbeError>;

    async fn get_port_for_pid(&self, pid: u32) -> Result<Option<u16>, ProbeError>;

    async fn start_service(&self, service: &Service) -> Result<(), ProbeError>;

    async fn stop_service(&self, service: &Service) -> Result<(), ProbeError>;

    async fn restart_service(&self, service: &Service) -> Result<(), ProbeError>;
}

async fn observe(
    collaborator: &dyn ProcessCollaborator,
    service_id: &str,
    declared_port: Option<u16>,
) -> Result<LiveFact, ProbeError> {
    if !collaborator.is_service_running(service_id).await? {
        return Ok(LiveFact::stopped());
    }

    let pid = collaborator.get_service_pid(service_id).await?;

    // A configured port wins; only ask the collaborator when there is none
    let port = match (declared_port, pid) {
        (Some(port), _) => Some(port),
        (None, Some(pid)) => match collaborator.get_port_for_pid(pid).await {
            Ok(port) => port,
            Err(e) => {
                debug!(service = service_id, pid, error = %e, "port lookup failed");
                None
            }
        },
        (None, None) => None,
    };

    Ok(LiveFact {
        running: true,
        pid,
        port,
    })
}

/// Queries the collaborator for every service concurrently
///
/// Failures are isolated per service: a failing service is missing from the
/// returned facts and reported as a fault instead.
pub async fn gather_facts(
    collaborator: Arc<dyn ProcessCollaborator>,
    config: &Config,
) -> (LiveFacts, Vec<ReconcileFault>) {
    let mut tasks = JoinSet::new();

    for service in config.services() {
        let collaborator = Arc::clone(&collaborator);
        let service_id = service.id.clone();
        let declared_port = service.declared_port();
        tasks.spawn(async move {
            let result = observe(collaborator.as_ref(), &service_id, declared_port).await;
            (service_id, result)
        });
    }

    let mut facts = LiveFacts::new();
    let mut faults = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((service_id, Ok(fact))) => {
                facts.insert(service_id, fact);
            }
            Ok((service_id, Err(e))) => {
                warn!(service = %service_id, error = %e, "reconciliation fault");
                faults.push(ReconcileFault {
                    service_id,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                warn!(error = %e, "fact gathering task failed");
            }
        }
    }

    faults.sort_by(|a, b| a.service_id.cmp(&b.service_id));
    (facts, faults)
}


#[cfg(test)]
mod tests {
    use super::fake::FakeCollaborator;
    use super::*;
    use crate::domain::ServiceGroup;

    fn config() -> Config {
        let mut g = ServiceGroup::new("g", "G");
        g.services.push(Service::new("cache", "Cache", "g", "/bin/redis"));
        let mut web = Service::new("web", "Web", "g", "/bin/web");
        web.port = Some(8080);
        g.services.push(web);
        g.services.push(Service::new("flaky", "Flaky", "g", "/bin/flaky"));
        Config {
            groups: vec![g],
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn gathers_pid_and_port() {
        let fake = Arc::new(FakeCollaborator::default());
        fake.set_running("cache", 4321);
        fake.set_port(4321, 6379);

        let (facts, faults) = gather_facts(fake, &config()).await;

        assert!(faults.is_empty());
        assert_eq!(facts["cache"], LiveFact::running(4321, Some(6379)));
        assert_eq!(facts["web"], LiveFact::stopped());
    }

    #[tokio::test]
    async fn declared_port_skips_lookup() {
        let fake = Arc::new(FakeCollaborator::default());
        fake.set_running("web", 77);
        fake.set_port(77, 9999);

        let (facts, _) = gather_facts(fake, &config()).await;
        assert_eq!(facts["web"].port, Some(8080));
    }

    #[tokio::test]
    async fn faults_are_isolated() {
        let fake = Arc::new(FakeCollaborator::default());
        fake.set_running("cache", 1);
        fake.set_unreachable("flaky");

        let (facts, faults) = gather_facts(fake, &config()).await;

        assert_eq!(facts.len(), 2);
        assert!(!facts.contains_key("flaky"));
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].service_id, "flaky");
    }
}
