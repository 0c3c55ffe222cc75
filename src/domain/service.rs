//! Service domain model
//!
//! A service is a single managed local process. It belongs to exactly one
//! group and may depend on other services, either through the legacy plain
//! `dependencies` list or through typed `dependencyConfigs`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Runtime status of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    #[default]
    Stopped,
    Starting,
    Stopping,
    Restarting,
    /// Exited abnormally
    Crashed,
    Error,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Restarting => "restarting",
            ServiceStatus::Crashed => "crashed",
            ServiceStatus::Error => "error",
        }
    }

    /// Returns true for the action-initiated states that only last until
    /// the next settled observation
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Starting | ServiceStatus::Stopping | ServiceStatus::Restarting
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }
}

/// Health status as reported by the health-check prober
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unconfigured,
    Checking,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unconfigured => "unconfigured",
            HealthStatus::Checking => "checking",
        }
    }
}

/// Kind of software a service runs (informational)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Tomcat,
    Redis,
    Nginx,
    Mysql,
    Nodejs,
    Batch,
    Shell,
    Python,
    Custom,
}

/// Type of dependency between services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    /// The dependency must be started before this service
    #[default]
    Required,
    /// Started first when present, but its failure does not block this service
    Optional,
    /// Must not run at the same time as this service
    Conflict,
}

impl DependencyType {
    /// Returns true if this edge constrains startup order
    pub fn affects_order(&self) -> bool {
        matches!(self, DependencyType::Required)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DependencyType::Required => "required",
            DependencyType::Optional => "optional",
            DependencyType::Conflict => "conflict",
        }
    }
}

impl std::str::FromStr for DependencyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" => Ok(DependencyType::Required),
            "optional" => Ok(DependencyType::Optional),
            "conflict" => Ok(DependencyType::Conflict),
            other => Err(format!(
                "unknown dependency type '{}' (expected required, optional or conflict)",
                other
            )),
        }
    }
}

/// A typed dependency on another service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyConfig {
    pub service_id: String,

    #[serde(rename = "type", default)]
    pub dep_type: DependencyType,

    /// How long to wait for the dependency to come up (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,

    /// Wait for the dependency's health check, not just its process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_required: Option<bool>,
}

impl DependencyConfig {
    pub fn new(service_id: impl Into<String>, dep_type: DependencyType) -> Self {
        Self {
            service_id: service_id.into(),
            dep_type,
            timeout: None,
            health_check_required: None,
        }
    }

    pub fn required(service_id: impl Into<String>) -> Self {
        Self::new(service_id, DependencyType::Required)
    }

    pub fn optional(service_id: impl Into<String>) -> Self {
        Self::new(service_id, DependencyType::Optional)
    }

    pub fn conflict(service_id: impl Into<String>) -> Self {
        Self::new(service_id, DependencyType::Conflict)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_retries: i64,
    /// Delay between attempts (ms)
    pub retry_delay: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: 3,
            retry_delay: 1000,
            backoff_multiplier: Some(2.0),
        }
    }
}

/// Timeouts in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    pub start_timeout: i64,
    pub stop_timeout: i64,
    pub health_check_timeout: i64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            start_timeout: 30_000,
            stop_timeout: 10_000,
            health_check_timeout: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    /// Memory ceiling (MB)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory: Option<i64>,
    /// CPU ceiling (percent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cpu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
    /// SIGTERM, SIGKILL or SIGINT
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_signal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graceful_shutdown_timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_on_crash: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Http,
    Tcp,
    Command,
}

/// Probe target of a structured health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckTarget {
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        #[serde(
            default,
            rename = "expectedStatus",
            skip_serializing_if = "Option::is_none"
        )]
        expected_status: Option<u16>,
    },
    Tcp {
        host: String,
        port: u16,
    },
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },
}

/// Structured health check configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub check_type: CheckType,
    pub config: CheckTarget,
    pub interval: i64,
    pub timeout: i64,
    pub retries: i64,
    pub failure_threshold: i64,
    pub success_threshold: i64,
    /// Grace period after start before checks begin (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<i64>,
}

/// Flat health check format from older configuration files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyHealthCheck {
    #[serde(rename = "type")]
    pub check_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub interval: i64,
    pub timeout: i64,
}

/// Health check in either the structured or the legacy flat format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HealthCheck {
    Structured(HealthCheckConfig),
    Legacy(LegacyHealthCheck),
}

impl HealthCheck {
    pub fn is_enabled(&self) -> bool {
        match self {
            HealthCheck::Structured(cfg) => cfg.enabled,
            HealthCheck::Legacy(_) => true,
        }
    }

    /// Probe timeout (ms)
    pub fn timeout(&self) -> i64 {
        match self {
            HealthCheck::Structured(cfg) => cfg.timeout,
            HealthCheck::Legacy(cfg) => cfg.timeout,
        }
    }

    /// Probe interval (ms)
    pub fn interval(&self) -> i64 {
        match self {
            HealthCheck::Structured(cfg) => cfg.interval,
            HealthCheck::Legacy(cfg) => cfg.interval,
        }
    }

    /// Derives the port the service listens on from the check target
    ///
    /// An explicit port wins over a URL; a URL without a port falls back to
    /// the scheme default (80 for http, 443 for https).
    pub fn port(&self) -> Option<u16> {
        match self {
            HealthCheck::Legacy(cfg) => cfg
                .port
                .or_else(|| cfg.url.as_deref().and_then(port_from_url)),
            HealthCheck::Structured(cfg) => match &cfg.config {
                CheckTarget::Tcp { port, .. } => Some(*port),
                CheckTarget::Http { url, .. } => port_from_url(url),
                CheckTarget::Command { .. } => None,
            },
        }
    }
}

fn port_from_url(raw: &str) -> Option<u16> {
    Url::parse(raw).ok()?.port_or_known_default()
}

/// A managed process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,

    /// Owning group
    #[serde(default)]
    pub group_id: String,

    /// Executable to launch
    pub path: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub auto_start: bool,

    /// Delay before launching (ms)
    #[serde(default)]
    pub startup_delay: i64,

    /// Explicitly configured listening port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default)]
    pub status: ServiceStatus,

    #[serde(default)]
    pub health_status: HealthStatus,

    /// Legacy plain dependency list (all treated as required)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Typed dependencies; supersede `dependencies` when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_configs: Option<Vec<DependencyConfig>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_config: Option<RetryConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_config: Option<TimeoutConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<ResourceLimits>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_config: Option<ProcessConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,

    // Runtime overlay, written only by reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_port: Option<u16>,
}

impl Service {
    /// Creates a stopped service with no dependencies
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        group_id: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            service_type: None,
            group_id: group_id.into(),
            path: path.into(),
            args: Vec::new(),
            work_dir: None,
            env: BTreeMap::new(),
            auto_start: false,
            startup_delay: 0,
            port: None,
            status: ServiceStatus::Stopped,
            health_status: HealthStatus::Unconfigured,
            dependencies: Vec::new(),
            dependency_configs: None,
            retry_config: None,
            timeout_config: None,
            resource_limits: None,
            process_config: None,
            health_check: None,
            pid: None,
            started_at: None,
            stopped_at: None,
            observed_port: None,
        }
    }

    /// Returns the dependency edges of this service as typed configs
    ///
    /// This is the single normalization point for the two representations:
    /// `dependencyConfigs` wins when present, otherwise every entry of the
    /// plain list is a required edge. Never both.
    pub fn dependency_edges(&self) -> Vec<DependencyConfig> {
        match &self.dependency_configs {
            Some(configs) => configs.clone(),
            None => self
                .dependencies
                .iter()
                .map(DependencyConfig::required)
                .collect(),
        }
    }

    /// IDs of services that must start before this one
    pub fn required_dependencies(&self) -> Vec<&str> {
        match &self.dependency_configs {
            Some(configs) => configs
                .iter()
                .filter(|d| d.dep_type.affects_order())
                .map(|d| d.service_id.as_str())
                .collect(),
            None => self.dependencies.iter().map(String::as_str).collect(),
        }
    }

    /// IDs of services this one must not run alongside
    pub fn conflicts(&self) -> impl Iterator<Item = &str> {
        self.dependency_configs
            .iter()
            .flatten()
            .filter(|d| d.dep_type == DependencyType::Conflict)
            .map(|d| d.service_id.as_str())
    }

    /// Returns true if this service declares a conflict with `other`
    pub fn conflicts_with(&self, other: &str) -> bool {
        self.conflicts().any(|id| id == other)
    }

    /// Adds a typed dependency, converting the legacy list first
    ///
    /// An existing edge to the same service is replaced.
    pub fn add_dependency(&mut self, dep: DependencyConfig) {
        let mut configs = self.dependency_edges();
        configs.retain(|d| d.service_id != dep.service_id);
        configs.push(dep);
        self.dependencies.clear();
        self.dependency_configs = Some(configs);
    }

    /// Removes every edge to `service_id` from both representations
    pub fn remove_dependency(&mut self, service_id: &str) -> bool {
        let before = self.dependencies.len()
            + self.dependency_configs.as_ref().map_or(0, Vec::len);

        self.dependencies.retain(|d| d != service_id);
        if let Some(configs) = self.dependency_configs.as_mut() {
            configs.retain(|d| d.service_id != service_id);
        }

        let after = self.dependencies.len()
            + self.dependency_configs.as_ref().map_or(0, Vec::len);
        after != before
    }

    /// Returns true if an enabled health check is configured
    pub fn has_health_check(&self) -> bool {
        self.health_check.as_ref().is_some_and(HealthCheck::is_enabled)
    }

    /// Port known from configuration alone
    pub fn declared_port(&self) -> Option<u16> {
        self.port
            .or_else(|| self.health_check.as_ref().and_then(HealthCheck::port))
    }

    /// Copies the runtime overlay from another version of this service
    pub fn adopt_runtime(&mut self, from: &Service) {
        self.status = from.status;
        self.health_status = from.health_status;
        self.pid = from.pid;
        self.started_at = from.started_at;
        self.stopped_at = from.stopped_at;
        self.observed_port = from.observed_port;
    }

    /// Drops all runtime-only fields, back to the resting state
    pub fn clear_runtime(&mut self) {
        self.status = ServiceStatus::Stopped;
        self.health_status = HealthStatus::Unconfigured;
        self.pid = None;
        self.started_at = None;
        self.stopped_at = None;
        self.observed_port = None;
    }

    /// Seconds since the observed start, if running
    pub fn uptime(&self, now: DateTime<Utc>) -> Option<i64> {
        self.started_at.map(|t| (now - t).num_seconds().max(0))
    }
}
