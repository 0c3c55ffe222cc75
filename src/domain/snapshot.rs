//! The configuration snapshot
//!
//! A [`Config`] is one version of the whole fleet: groups (which own their
//! services), applications, and global settings. Snapshots are treated as
//! immutable values; every change builds a new one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::group::{Application, ServiceGroup};
use super::service::{HealthStatus, Service, ServiceStatus};

fn default_theme() -> String {
    "system".to_string()
}

fn default_server_port() -> u16 {
    8899
}

/// Fleet-wide settings stored alongside the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSettings {
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Start auto-start services when the fleet is opened
    #[serde(default)]
    pub auto_start: bool,

    #[serde(default = "default_theme")]
    pub theme: String,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            auto_start: false,
            theme: default_theme(),
        }
    }
}

/// Root aggregate of the declarative configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub settings: FleetSettings,

    #[serde(default)]
    pub groups: Vec<ServiceGroup>,

    #[serde(default)]
    pub applications: Vec<Application>,
}

/// Runtime fields of one service, persisted outside the declarative store
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOverlay {
    pub status: ServiceStatus,
    #[serde(default)]
    pub health_status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_port: Option<u16>,
}

impl Config {
    /// Iterates over every service in group order
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.groups.iter().flat_map(|g| g.services.iter())
    }

    pub fn group(&self, group_id: &str) -> Option<&ServiceGroup> {
        self.groups.iter().find(|g| g.id == group_id)
    }

    pub fn group_mut(&mut self, group_id: &str) -> Option<&mut ServiceGroup> {
        self.groups.iter_mut().find(|g| g.id == group_id)
    }

    pub fn application(&self, app_id: &str) -> Option<&Application> {
        self.applications.iter().find(|a| a.id == app_id)
    }

    pub fn application_mut(&mut self, app_id: &str) -> Option<&mut Application> {
        self.applications.iter_mut().find(|a| a.id == app_id)
    }

    /// Finds a service and the group that actually contains it
    pub fn find_service(&self, service_id: &str) -> Option<(&ServiceGroup, &Service)> {
        self.groups
            .iter()
            .find_map(|g| g.service(service_id).map(|s| (g, s)))
    }

    pub fn service(&self, service_id: &str) -> Option<&Service> {
        self.find_service(service_id).map(|(_, s)| s)
    }

    pub fn service_mut(&mut self, service_id: &str) -> Option<&mut Service> {
        self.groups
            .iter_mut()
            .find_map(|g| g.service_mut(service_id))
    }

    pub fn has_service(&self, service_id: &str) -> bool {
        self.service(service_id).is_some()
    }

    pub fn has_group(&self, group_id: &str) -> bool {
        self.group(group_id).is_some()
    }

    pub fn service_count(&self) -> usize {
        self.groups.iter().map(|g| g.services.len()).sum()
    }

    /// Display name of a group, falling back to its ID
    pub fn group_name<'a>(&'a self, group_id: &'a str) -> &'a str {
        self.group(group_id)
            .map(|g| g.name.as_str())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(group_id)
    }

    /// Display name of a service, falling back to its ID
    pub fn service_name<'a>(&'a self, service_id: &'a str) -> &'a str {
        self.service(service_id)
            .map(|s| s.name.as_str())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(service_id)
    }

    /// Copies the runtime overlay of every service that also exists in `from`
    ///
    /// Used when a declarative change lands on top of a snapshot that was
    /// enriched in the meantime, so observations are not rolled back.
    pub fn adopt_runtime(&mut self, from: &Config) {
        for group in &mut self.groups {
            for service in &mut group.services {
                if let Some(previous) = from.service(&service.id) {
                    service.adopt_runtime(previous);
                }
            }
        }
    }

    /// Returns a copy with every runtime-only field cleared
    pub fn declarative(&self) -> Config {
        let mut copy = self.clone();
        for group in &mut copy.groups {
            for service in &mut group.services {
                service.clear_runtime();
            }
        }
        copy
    }

    /// Extracts the runtime overlay of every service
    pub fn overlay(&self) -> HashMap<String, RuntimeOverlay> {
        self.services()
            .map(|s| {
                (
                    s.id.clone(),
                    RuntimeOverlay {
                        status: s.status,
                        health_status: s.health_status,
                        pid: s.pid,
                        started_at: s.started_at,
                        stopped_at: s.stopped_at,
                        observed_port: s.observed_port,
                    },
                )
            })
            .collect()
    }

    /// Applies a previously extracted overlay; unknown IDs are ignored
    pub fn apply_overlay(&mut self, overlay: &HashMap<String, RuntimeOverlay>) {
        for group in &mut self.groups {
            for service in &mut group.services {
                if let Some(o) = overlay.get(&service.id) {
                    service.status = o.status;
                    service.health_status = o.health_status;
                    service.pid = o.pid;
                    service.started_at = o.started_at;
                    service.stopped_at = o.stopped_at;
                    service.observed_port = o.observed_port;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        let mut backend = ServiceGroup::new("backend", "Backend");
        backend
            .services
            .push(Service::new("api", "API", "backend", "/bin/api"));
        let mut data = ServiceGroup::new("data", "");
        data.services
            .push(Service::new("db", "Database", "data", "/bin/db"));

        Config {
            settings: FleetSettings::default(),
            groups: vec![backend, data],
            applications: vec![],
        }
    }

    #[test]
    fn find_service_returns_containing_group() {
        let config = sample();
        let (group, service) = config.find_service("db").unwrap();
        assert_eq!(group.id, "data");
        assert_eq!(service.name, "Database");
        assert!(config.find_service("missing").is_none());
        assert_eq!(config.service_count(), 2);
    }

    #[test]
    fn names_fall_back_to_ids() {
        let config = sample();
        assert_eq!(config.group_name("backend"), "Backend");
        assert_eq!(config.group_name("data"), "data");
        assert_eq!(config.group_name("ghost"), "ghost");
    }

    #[test]
    fn declarative_strips_runtime() {
        let mut config = sample();
        let svc = config.service_mut("api").unwrap();
        svc.pid = Some(42);
        svc.started_at = Some(Utc::now());

        let clean = config.declarative();
        assert_eq!(clean.service("api").unwrap().pid, None);
        assert_eq!(clean.service("api").unwrap().started_at, None);
        assert_eq!(config.service("api").unwrap().pid, Some(42));
    }

    #[test]
    fn overlay_round_trips_through_apply() {
        let mut config = sample();
        {
            let svc = config.service_mut("api").unwrap();
            svc.status = ServiceStatus::Running;
            svc.pid = Some(7);
        }

        let overlay = config.overlay();
        let mut fresh = sample();
        fresh.apply_overlay(&overlay);

        assert_eq!(fresh.service("api").unwrap().status, ServiceStatus::Running);
        assert_eq!(fresh.service("api").unwrap().pid, Some(7));
    }

    #[test]
    fn adopt_runtime_keeps_declarative_changes() {
        let mut enriched = sample();
        enriched.service_mut("api").unwrap().pid = Some(99);

        let mut edited = sample();
        edited.service_mut("api").unwrap().path = "/opt/api".to_string();
        edited.adopt_runtime(&enriched);

        let api = edited.service("api").unwrap();
        assert_eq!(api.pid, Some(99));
        assert_eq!(api.path, "/opt/api");
    }

    #[test]
    fn parse_minimal_config() {
        let json = r#"{"groups": []}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.settings.server_port, 8899);
        assert_eq!(config.settings.theme, "system");
        assert!(config.applications.is_empty());
    }
}
