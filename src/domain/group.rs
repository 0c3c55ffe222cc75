//! Service groups and applications
//!
//! A group owns an ordered list of services and is the unit of group-level
//! startup dependencies. An application only labels a set of groups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::service::Service;

/// How services inside a group are launched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StartupStrategy {
    /// Wait for each service before starting the next
    #[default]
    Sequential,
    /// Start every service at once
    Parallel,
    /// Start each dependency batch in parallel, batches in sequence
    Mixed,
}

impl std::str::FromStr for StartupStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(StartupStrategy::Sequential),
            "parallel" => Ok(StartupStrategy::Parallel),
            "mixed" => Ok(StartupStrategy::Mixed),
            other => Err(format!(
                "unknown startup strategy '{}' (expected sequential, parallel or mixed)",
                other
            )),
        }
    }
}

/// An ordered collection of services sharing a startup dependency unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceGroup {
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Back-reference to the application this group is shown under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,

    /// Delay before the group starts (ms)
    #[serde(default, alias = "delay")]
    pub startup_delay: i64,

    #[serde(default, alias = "tasks")]
    pub services: Vec<Service>,

    /// Display order, also the first startup tie-break
    #[serde(default)]
    pub order: i32,

    /// Groups that must be fully started before this one
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_strategy: Option<StartupStrategy>,
}

impl ServiceGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            application_id: None,
            startup_delay: 0,
            services: Vec::new(),
            order: 0,
            dependencies: Vec::new(),
            startup_strategy: None,
        }
    }

    pub fn service(&self, service_id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == service_id)
    }

    pub fn service_mut(&mut self, service_id: &str) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| s.id == service_id)
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.service(service_id).is_some()
    }

    pub fn depends_on(&self, group_id: &str) -> bool {
        self.dependencies.iter().any(|d| d == group_id)
    }

    pub fn strategy(&self) -> StartupStrategy {
        self.startup_strategy.unwrap_or_default()
    }
}

/// A labeling aggregate over one or more groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default)]
    pub group_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Application {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            icon: None,
            group_ids: Vec::new(),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    pub fn includes(&self, group_id: &str) -> bool {
        self.group_ids.iter().any(|g| g == group_id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}
