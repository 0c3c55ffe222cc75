//! Consistency checks over a candidate snapshot
//!
//! The validator is the gate every mutation passes before it is committed,
//! and it doubles as the standalone lint behind `fleet validate`. It never
//! modifies the snapshot it is given.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::graph::GraphIndex;
use super::planner::{Scope, StartupPlanner};
use super::service::{DependencyType, HealthCheck, Service};
use super::snapshot::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single finding, addressed by a dotted field path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// A result holding a single error
    pub fn rejected(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut result = Self::default();
        result.error(field, message);
        result.finish()
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
            severity: Severity::Error,
        });
    }

    fn warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
            severity: Severity::Warning,
        });
    }

    fn finish(mut self) -> Self {
        self.valid = self.errors.is_empty();
        self
    }

    /// Returns true if any error mentions `needle` in its field or message
    pub fn mentions(&self, needle: &str) -> bool {
        self.errors
            .iter()
            .any(|e| e.field.contains(needle) || e.message.contains(needle))
    }
}

/// Tunables for the validator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidatorOptions {
    /// Treat a conflict between two auto-start services that would launch in
    /// the same batch as an error instead of a warning
    pub reject_autostart_conflicts: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyValidator {
    options: ValidatorOptions,
}

impl DependencyValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ValidatorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> ValidatorOptions {
        self.options
    }

    /// Runs every check and aggregates the findings
    pub fn validate(&self, config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();
        let index = GraphIndex::build(config);

        check_duplicate_ids(config, &mut result);

        for group in &config.groups {
            if group.id.trim().is_empty() {
                result.error(format!("groups.{}.id", group.id), "Group ID cannot be empty");
            }
            if group.name.trim().is_empty() {
                result.error(
                    format!("groups.{}.name", group.id),
                    "Group name cannot be empty",
                );
            }
            if group.startup_delay < 0 {
                result.error(
                    format!("groups.{}.startupDelay", group.id),
                    "Startup delay cannot be negative",
                );
            }
            for dep in &group.dependencies {
                if !config.has_group(dep) {
                    result.error(
                        format!("groups.{}.dependencies", group.id),
                        format!("Referenced group \"{}\" does not exist", dep),
                    );
                }
            }
            if let Some(app_id) = &group.application_id {
                if config.application(app_id).is_none() {
                    result.error(
                        format!("groups.{}.applicationId", group.id),
                        format!("Referenced application \"{}\" does not exist", app_id),
                    );
                }
            }

            for service in &group.services {
                if service.group_id != group.id {
                    result.error(
                        format!("services.{}.groupId", service.id),
                        format!(
                            "Service is listed in group \"{}\" but declares group \"{}\"",
                            group.id, service.group_id
                        ),
                    );
                }
                check_service(service, config, &mut result);
            }
        }

        for app in &config.applications {
            if app.id.trim().is_empty() {
                result.error(
                    format!("applications.{}.id", app.id),
                    "Application ID cannot be empty",
                );
            }
            if app.name.trim().is_empty() {
                result.error(
                    format!("applications.{}.name", app.id),
                    "Application name cannot be empty",
                );
            }
            for group_id in &app.group_ids {
                if !config.has_group(group_id) {
                    result.error(
                        format!("applications.{}.groupIds", app.id),
                        format!("Referenced group \"{}\" does not exist", group_id),
                    );
                }
            }
        }

        if let Some(cycle) = index.group_graph().find_cycle() {
            let names: Vec<&str> = cycle.iter().map(|id| config.group_name(id)).collect();
            result.error(
                "groups.dependencies",
                format!("Circular group dependencies detected: {}", names.join(" -> ")),
            );
        }

        if let Some(cycle) = index.service_graph().find_cycle() {
            let names: Vec<&str> = cycle.iter().map(|id| config.service_name(id)).collect();
            result.error(
                "dependencies",
                format!("Circular dependencies detected: {}", names.join(" -> ")),
            );
        }

        self.check_autostart_conflicts(config, &index, &mut result);

        let result = result.finish();
        debug!(
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "validated configuration"
        );
        result
    }

    /// Flags conflict edges between auto-start services that the group
    /// launcher would find ready in the same batch
    ///
    /// Batches come from the group-scoped plan `start_group` and
    /// `start_auto` follow, where the planner has to defer one of the pair.
    fn check_autostart_conflicts(
        &self,
        config: &Config,
        index: &GraphIndex,
        result: &mut ValidationResult,
    ) {
        if index.service_graph().has_cycle() {
            return;
        }

        let mut reported: HashSet<(String, String)> = HashSet::new();
        for group in &config.groups {
            let Ok(plan) =
                StartupPlanner::plan_with_index(config, index, Scope::Group(group.id.clone()))
            else {
                continue;
            };

            for deferral in &plan.deferred {
                let Some(deferred) = config.service(&deferral.id) else {
                    continue;
                };
                if !deferred.auto_start {
                    continue;
                }

                let batch = plan.batches.get(deferral.batch).into_iter().flatten();
                for other_id in batch {
                    let Some(other) = config.service(other_id) else {
                        continue;
                    };
                    if !other.auto_start
                        || !(deferred.conflicts_with(other_id) || other.conflicts_with(&deferred.id))
                    {
                        continue;
                    }

                    let (declaring, target) = if other.conflicts_with(&deferred.id) {
                        (other, deferred)
                    } else {
                        (deferred, other)
                    };
                    let pair = if declaring.id < target.id {
                        (declaring.id.clone(), target.id.clone())
                    } else {
                        (target.id.clone(), declaring.id.clone())
                    };
                    if !reported.insert(pair) {
                        continue;
                    }

                    let field = format!("services.{}.dependencyConfigs", declaring.id);
                    let message = format!(
                        "Auto-start services \"{}\" and \"{}\" conflict and would start in the same batch",
                        declaring.name, target.name
                    );
                    if self.options.reject_autostart_conflicts {
                        result.error(field, message);
                    } else {
                        result.warning(field, message);
                    }
                }
            }
        }
    }
}

fn check_duplicate_ids(config: &Config, result: &mut ValidationResult) {
    let mut groups: HashMap<&str, usize> = HashMap::new();
    for group in &config.groups {
        *groups.entry(group.id.as_str()).or_default() += 1;
    }
    let mut services: HashMap<&str, usize> = HashMap::new();
    for service in config.services() {
        *services.entry(service.id.as_str()).or_default() += 1;
    }
    let mut apps: HashMap<&str, usize> = HashMap::new();
    for app in &config.applications {
        *apps.entry(app.id.as_str()).or_default() += 1;
    }

    let mut report = |kind: &str, counts: HashMap<&str, usize>| {
        let mut dupes: Vec<&str> = counts
            .into_iter()
            .filter(|(id, n)| *n > 1 && !id.trim().is_empty())
            .map(|(id, _)| id)
            .collect();
        dupes.sort_unstable();
        for id in dupes {
            result.error(
                format!("{}.{}.id", kind, id),
                format!("Duplicate {} ID \"{}\"", kind.trim_end_matches('s'), id),
            );
        }
    };

    report("groups", groups);
    report("services", services);
    report("applications", apps);
}

fn check_service(service: &Service, config: &Config, result: &mut ValidationResult) {
    let prefix = format!("services.{}", service.id);

    if service.id.trim().is_empty() {
        result.error(format!("{}.id", prefix), "Service ID cannot be empty");
    }
    if service.name.trim().is_empty() {
        result.error(format!("{}.name", prefix), "Service name cannot be empty");
    }
    if service.path.trim().is_empty() {
        result.error(format!("{}.path", prefix), "Service path cannot be empty");
    }
    if service.startup_delay < 0 {
        result.error(
            format!("{}.startupDelay", prefix),
            "Startup delay cannot be negative",
        );
    }

    if let Some(retry) = &service.retry_config {
        if retry.max_retries < 0 {
            result.error(
                format!("{}.retryConfig.maxRetries", prefix),
                "Max retries cannot be negative",
            );
        }
        if retry.retry_delay < 0 {
            result.error(
                format!("{}.retryConfig.retryDelay", prefix),
                "Retry delay cannot be negative",
            );
        }
        if retry.backoff_multiplier.is_some_and(|m| m <= 0.0) {
            result.error(
                format!("{}.retryConfig.backoffMultiplier", prefix),
                "Backoff multiplier must be positive",
            );
        }
    }

    if let Some(timeouts) = &service.timeout_config {
        for (field, value, label) in [
            ("startTimeout", timeouts.start_timeout, "Start timeout"),
            ("stopTimeout", timeouts.stop_timeout, "Stop timeout"),
            ("healthCheckTimeout", timeouts.health_check_timeout, "Health check timeout"),
        ] {
            if value <= 0 {
                result.error(
                    format!("{}.timeoutConfig.{}", prefix, field),
                    format!("{} must be positive", label),
                );
            }
        }
    }

    if let Some(limits) = &service.resource_limits {
        if limits.max_memory.is_some_and(|m| m <= 0) {
            result.error(
                format!("{}.resourceLimits.maxMemory", prefix),
                "Max memory must be positive",
            );
        }
        if limits.max_cpu.is_some_and(|c| c <= 0.0 || c > 100.0) {
            result.error(
                format!("{}.resourceLimits.maxCpu", prefix),
                "Max CPU must be between 0 and 100",
            );
        }
    }

    if let Some(timeout) = service
        .process_config
        .as_ref()
        .and_then(|p| p.graceful_shutdown_timeout)
    {
        if timeout <= 0 {
            result.error(
                format!("{}.processConfig.gracefulShutdownTimeout", prefix),
                "Graceful shutdown timeout must be positive",
            );
        }
    }

    if let Some(check) = &service.health_check {
        if check.timeout() <= 0 {
            result.error(
                format!("{}.healthCheck.timeout", prefix),
                "Health check timeout must be positive",
            );
        }
        if check.interval() <= 0 {
            result.error(
                format!("{}.healthCheck.interval", prefix),
                "Health check interval must be positive",
            );
        }
        if let HealthCheck::Structured(cfg) = check {
            if cfg.retries < 0 {
                result.error(
                    format!("{}.healthCheck.retries", prefix),
                    "Health check retries cannot be negative",
                );
            }
        }
    }

    // Both lists must resolve even though only one feeds the cycle graph
    for dep in &service.dependencies {
        if !config.has_service(dep) {
            result.error(
                format!("{}.dependencies", prefix),
                format!("Referenced service \"{}\" does not exist", dep),
            );
        }
    }

    let field = format!("{}.dependencyConfigs", prefix);
    for dep in service.dependency_configs.iter().flatten() {
        if !config.has_service(&dep.service_id) {
            result.error(
                field.clone(),
                format!("Referenced service \"{}\" does not exist", dep.service_id),
            );
        }
        if dep.timeout.is_some_and(|t| t < 0) {
            result.error(
                format!("{}.timeout", field),
                "Dependency timeout cannot be negative",
            );
        }
        if dep.dep_type == DependencyType::Conflict {
            result.warning(
                field.clone(),
                format!(
                    "Conflict dependency with \"{}\" may prevent service from starting",
                    dep.service_id
                ),
            );
        }
    }

    if service.auto_start && !service.has_health_check() {
        result.warning(
            format!("{}.healthCheck", prefix),
            "No health check configured for auto-start service",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Application, DependencyConfig, ResourceLimits, ServiceGroup, TimeoutConfig,
    };

    fn group(id: &str, deps: &[&str]) -> ServiceGroup {
        let mut g = ServiceGroup::new(id, id);
        g.dependencies = deps.iter().map(|d| d.to_string()).collect();
        g
    }

    fn svc(id: &str, group: &str) -> Service {
        Service::new(id, id, group, format!("/bin/{}", id))
    }

    fn config(groups: Vec<ServiceGroup>) -> Config {
        Config {
            groups,
            ..Config::default()
        }
    }

    #[test]
    fn acyclic_config_is_valid() {
        let mut db = group("db", &[]);
        db.services.push(svc("pg", "db"));
        let mut api = group("api", &["db"]);
        let mut server = svc("server", "api");
        server.dependencies = vec!["pg".to_string()];
        api.services.push(server);

        let result = DependencyValidator::new().validate(&config(vec![db, api]));
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn group_cycle_names_both_groups() {
        let result = DependencyValidator::new()
            .validate(&config(vec![group("A", &["B"]), group("B", &["A"])]));

        assert!(!result.valid);
        let cycle = result
            .errors
            .iter()
            .find(|e| e.message.starts_with("Circular group dependencies"))
            .unwrap();
        assert_eq!(cycle.message, "Circular group dependencies detected: A -> B -> A");
    }

    #[test]
    fn cycle_uses_display_names() {
        let mut a = group("a", &["b"]);
        a.name = "Frontend".to_string();
        let mut b = group("b", &["a"]);
        b.name = "Backend".to_string();

        let result = DependencyValidator::new().validate(&config(vec![a, b]));
        assert!(result.mentions("Frontend -> Backend -> Frontend"));
    }

    #[test]
    fn service_cycle_detected_in_both_representations() {
        let mut g = group("g", &[]);
        let mut a = svc("a", "g");
        a.dependencies = vec!["b".to_string()];
        let mut b = svc("b", "g");
        b.dependency_configs = Some(vec![DependencyConfig::required("a")]);
        g.services = vec![a, b];

        let result = DependencyValidator::new().validate(&config(vec![g]));
        assert!(result.mentions("Circular dependencies detected: a -> b -> a"));
    }

    #[test]
    fn optional_and_conflict_edges_do_not_form_cycles() {
        let mut g = group("g", &[]);
        let mut a = svc("a", "g");
        a.dependency_configs = Some(vec![DependencyConfig::optional("b")]);
        let mut b = svc("b", "g");
        b.dependency_configs = Some(vec![DependencyConfig::conflict("a")]);
        g.services = vec![a, b];

        let result = DependencyValidator::new().validate(&config(vec![g]));
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn typed_configs_shadow_plain_list() {
        // The stale plain list would form a cycle; only the typed list counts
        let mut g = group("g", &[]);
        let mut a = svc("a", "g");
        a.dependencies = vec!["b".to_string()];
        a.dependency_configs = Some(vec![]);
        let mut b = svc("b", "g");
        b.dependencies = vec!["a".to_string()];
        g.services = vec![a, b];

        assert!(DependencyValidator::new().validate(&config(vec![g])).valid);
    }

    #[test]
    fn dangling_references_are_errors() {
        let mut g = group("g", &["ghost"]);
        let mut a = svc("a", "g");
        a.dependencies = vec!["nope".to_string()];
        g.services.push(a);
        let mut app = Application::new("shop", "Shop");
        app.group_ids = vec!["missing".to_string()];

        let mut cfg = config(vec![g]);
        cfg.applications.push(app);

        let result = DependencyValidator::new().validate(&cfg);
        assert!(!result.valid);
        assert!(result.mentions("Referenced group \"ghost\" does not exist"));
        assert!(result.mentions("Referenced service \"nope\" does not exist"));
        assert!(result.mentions("applications.shop.groupIds"));
    }

    #[test]
    fn plain_list_is_checked_even_when_typed_list_present() {
        let mut g = group("g", &[]);
        let mut a = svc("a", "g");
        a.dependencies = vec!["ghost".to_string()];
        a.dependency_configs = Some(vec![]);
        g.services.push(a);

        let result = DependencyValidator::new().validate(&config(vec![g]));
        assert!(!result.valid);
        let dangling = result
            .errors
            .iter()
            .find(|e| e.message == "Referenced service \"ghost\" does not exist")
            .unwrap();
        assert_eq!(dangling.field, "services.a.dependencies");
    }

    #[test]
    fn typed_list_reference_reported_under_its_own_field() {
        let mut g = group("g", &[]);
        let mut a = svc("a", "g");
        a.dependency_configs = Some(vec![DependencyConfig::optional("ghost")]);
        g.services.push(a);

        let result = DependencyValidator::new().validate(&config(vec![g]));
        assert!(!result.valid);
        assert_eq!(result.errors[0].field, "services.a.dependencyConfigs");
    }

    #[test]
    fn field_checks() {
        let mut g = group("g", &[]);
        let mut a = svc("a", "g");
        a.name = "  ".to_string();
        a.startup_delay = -1;
        a.timeout_config = Some(TimeoutConfig {
            start_timeout: 0,
            ..TimeoutConfig::default()
        });
        a.resource_limits = Some(ResourceLimits {
            max_cpu: Some(150.0),
            max_memory: Some(0),
            priority: None,
        });
        g.services.push(a);

        let result = DependencyValidator::new().validate(&config(vec![g]));
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"services.a.name"));
        assert!(fields.contains(&"services.a.startupDelay"));
        assert!(fields.contains(&"services.a.timeoutConfig.startTimeout"));
        assert!(fields.contains(&"services.a.resourceLimits.maxCpu"));
        assert!(fields.contains(&"services.a.resourceLimits.maxMemory"));
    }

    #[test]
    fn max_cpu_upper_bound_is_inclusive() {
        let mut g = group("g", &[]);
        let mut a = svc("a", "g");
        a.resource_limits = Some(ResourceLimits {
            max_cpu: Some(100.0),
            ..ResourceLimits::default()
        });
        g.services.push(a);

        assert!(DependencyValidator::new().validate(&config(vec![g])).valid);
    }

    #[test]
    fn autostart_without_health_check_is_warning() {
        let mut g = group("g", &[]);
        let mut a = svc("a", "g");
        a.auto_start = true;
        g.services.push(a);

        let result = DependencyValidator::new().validate(&config(vec![g]));
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].field, "services.a.healthCheck");
        assert_eq!(result.warnings[0].severity, Severity::Warning);
    }

    #[test]
    fn membership_and_duplicates() {
        let mut g1 = group("g1", &[]);
        g1.services.push(svc("a", "g2"));
        let mut g2 = group("g2", &[]);
        g2.services.push(svc("a", "g2"));

        let result = DependencyValidator::new().validate(&config(vec![g1, g2]));
        assert!(result.mentions("services.a.groupId"));
        assert!(result.mentions("Duplicate service ID \"a\""));
    }

    fn conflicting_autostart() -> Config {
        let mut g = group("g", &[]);
        let mut a = svc("a", "g");
        a.auto_start = true;
        a.dependency_configs = Some(vec![DependencyConfig::conflict("b")]);
        let mut b = svc("b", "g");
        b.auto_start = true;
        g.services = vec![a, b];
        config(vec![g])
    }

    #[test]
    fn autostart_conflict_is_warning_by_default() {
        let result = DependencyValidator::new().validate(&conflicting_autostart());
        assert!(result.valid);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("would start in the same batch")));
    }

    #[test]
    fn autostart_conflict_is_error_when_hardened() {
        let validator = DependencyValidator::with_options(ValidatorOptions {
            reject_autostart_conflicts: true,
        });
        let result = validator.validate(&conflicting_autostart());
        assert!(!result.valid);
        assert!(result.mentions("would start in the same batch"));
    }

    #[test]
    fn edge_to_another_group_does_not_separate_conflicting_pair() {
        // a waits for x, but x lives in another group, so the group plan
        // still finds a and b ready together
        let mut cfg = conflicting_autostart();
        cfg.service_mut("a").unwrap().dependency_configs = Some(vec![
            DependencyConfig::conflict("b"),
            DependencyConfig::required("x"),
        ]);
        let mut h = group("h", &[]);
        h.services.push(svc("x", "h"));
        cfg.groups.push(h);

        let validator = DependencyValidator::with_options(ValidatorOptions {
            reject_autostart_conflicts: true,
        });
        let result = validator.validate(&cfg);
        assert!(!result.valid);
        let conflict = result
            .errors
            .iter()
            .find(|e| e.message.contains("would start in the same batch"))
            .unwrap();
        assert_eq!(conflict.field, "services.a.dependencyConfigs");
    }

    #[test]
    fn conflict_across_groups_is_plain_warning() {
        let mut g = group("g", &[]);
        let mut a = svc("a", "g");
        a.auto_start = true;
        a.dependency_configs = Some(vec![DependencyConfig::conflict("b")]);
        g.services.push(a);
        let mut h = group("h", &[]);
        let mut b = svc("b", "h");
        b.auto_start = true;
        h.services.push(b);

        let validator = DependencyValidator::with_options(ValidatorOptions {
            reject_autostart_conflicts: true,
        });
        let result = validator.validate(&config(vec![g, h]));
        assert!(result.valid, "{:?}", result.errors);
        assert!(!result
            .warnings
            .iter()
            .any(|w| w.message.contains("would start in the same batch")));
    }

    #[test]
    fn conflict_in_different_batches_is_plain_warning() {
        let mut cfg = conflicting_autostart();
        // b now waits for a, so they never launch together
        cfg.service_mut("b").unwrap().dependencies = vec!["a".to_string()];

        let validator = DependencyValidator::with_options(ValidatorOptions {
            reject_autostart_conflicts: true,
        });
        assert!(validator.validate(&cfg).valid);
    }
}
