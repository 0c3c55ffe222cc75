//! Typed configuration changes
//!
//! A [`Mutation`] is applied copy-on-write: [`Mutation::apply`] never touches
//! the base snapshot and returns a candidate that still has to pass the
//! validator before it may be committed. Structural problems that make the
//! change meaningless (unknown target, duplicate ID) are reported here;
//! everything else is left to the validator.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::group::{Application, ServiceGroup};
use super::id::{generate_id, EntityKind};
use super::service::{DependencyConfig, Service, ServiceStatus};
use super::snapshot::{Config, FleetSettings};
use super::validator::ValidationResult;

#[derive(Debug, Error, PartialEq)]
pub enum MutationError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: EntityKind, id: String },

    #[error("Group {id} still has {services} service(s); delete them first or cascade")]
    GroupNotEmpty { id: String, services: usize },

    #[error("No dependency from {from} on {to}")]
    EdgeNotFound { from: String, to: String },
}

impl MutationError {
    /// Field path used when the error is reported as a rejection
    pub fn field(&self) -> String {
        match self {
            MutationError::NotFound { kind, id } | MutationError::AlreadyExists { kind, id } => {
                format!("{}.{}", collection(*kind), id)
            }
            MutationError::GroupNotEmpty { id, .. } => format!("groups.{}.services", id),
            MutationError::EdgeNotFound { from, .. } => format!("{}.dependencies", from),
        }
    }

    pub fn into_rejection(self) -> ValidationResult {
        ValidationResult::rejected(self.field(), self.to_string())
    }
}

fn collection(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Service => "services",
        EntityKind::Group => "groups",
        EntityKind::Application => "applications",
    }
}

/// A single proposed change to the declarative configuration
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateApplication(Application),
    UpdateApplication(Application),
    /// Removes the application; its groups are kept
    DeleteApplication { id: String },
    /// Removes the application and every group it lists
    DeleteApplicationCascade { id: String },
    AttachGroup { application_id: String, group_id: String },
    DetachGroup { application_id: String, group_id: String },

    CreateGroup(ServiceGroup),
    /// Replaces a group's fields; its services are kept
    UpdateGroup(ServiceGroup),
    /// Removes an empty group
    DeleteGroup { id: String },
    /// Removes a group together with its services
    DeleteGroupCascade { id: String },
    AddGroupDependency { group_id: String, depends_on: String },
    RemoveGroupDependency { group_id: String, depends_on: String },

    CreateService(Service),
    /// Replaces a service definition, moving it if `groupId` changed
    UpdateService(Service),
    DeleteService { id: String },
    AddServiceDependency { service_id: String, dependency: DependencyConfig },
    RemoveServiceDependency { service_id: String, depends_on: String },

    UpdateSettings(FleetSettings),
    /// Replaces the whole declarative configuration (import)
    ReplaceConfig(Config),
}

impl Mutation {
    /// Short human-readable description for logs and CLI output
    pub fn describe(&self) -> String {
        match self {
            Mutation::CreateApplication(app) => format!("create application {}", app.id),
            Mutation::UpdateApplication(app) => format!("update application {}", app.id),
            Mutation::DeleteApplication { id } => format!("delete application {}", id),
            Mutation::DeleteApplicationCascade { id } => {
                format!("delete application {} with its groups", id)
            }
            Mutation::AttachGroup { application_id, group_id } => {
                format!("attach group {} to {}", group_id, application_id)
            }
            Mutation::DetachGroup { application_id, group_id } => {
                format!("detach group {} from {}", group_id, application_id)
            }
            Mutation::CreateGroup(group) => format!("create group {}", group.id),
            Mutation::UpdateGroup(group) => format!("update group {}", group.id),
            Mutation::DeleteGroup { id } => format!("delete group {}", id),
            Mutation::DeleteGroupCascade { id } => format!("delete group {} with its services", id),
            Mutation::AddGroupDependency { group_id, depends_on } => {
                format!("group {} depends on {}", group_id, depends_on)
            }
            Mutation::RemoveGroupDependency { group_id, depends_on } => {
                format!("group {} no longer depends on {}", group_id, depends_on)
            }
            Mutation::CreateService(svc) => format!("create service {}", svc.id),
            Mutation::UpdateService(svc) => format!("update service {}", svc.id),
            Mutation::DeleteService { id } => format!("delete service {}", id),
            Mutation::AddServiceDependency { service_id, dependency } => format!(
                "service {} {} depends on {}",
                service_id,
                dependency.dep_type.label(),
                dependency.service_id
            ),
            Mutation::RemoveServiceDependency { service_id, depends_on } => {
                format!("service {} no longer depends on {}", service_id, depends_on)
            }
            Mutation::UpdateSettings(_) => "update settings".to_string(),
            Mutation::ReplaceConfig(_) => "replace configuration".to_string(),
        }
    }

    /// Builds the candidate snapshot this change would produce
    pub fn apply(self, base: &Config, now: DateTime<Utc>) -> Result<Config, MutationError> {
        let mut next = base.clone();

        match self {
            Mutation::CreateApplication(mut app) => {
                if app.id.trim().is_empty() {
                    app.id = generate_id(EntityKind::Application, &app.name, now);
                }
                if next.application(&app.id).is_some() {
                    return Err(already_exists(EntityKind::Application, &app.id));
                }
                app.created_at.get_or_insert(now);
                app.updated_at = Some(now);
                link_groups(&mut next, &app.id, &app.group_ids);
                next.applications.push(app);
            }

            Mutation::UpdateApplication(mut app) => {
                let existing = next
                    .application(&app.id)
                    .ok_or_else(|| not_found(EntityKind::Application, &app.id))?
                    .clone();
                app.created_at = existing.created_at;
                app.updated_at = Some(now);

                let dropped: Vec<String> = existing
                    .group_ids
                    .iter()
                    .filter(|g| !app.includes(g))
                    .cloned()
                    .collect();
                unlink_groups(&mut next, &app.id, &dropped);
                link_groups(&mut next, &app.id, &app.group_ids);

                if let Some(slot) = next.application_mut(&app.id) {
                    *slot = app;
                }
            }

            Mutation::DeleteApplication { id } => {
                let app = take_application(&mut next, &id)?;
                unlink_groups(&mut next, &id, &app.group_ids);
            }

            Mutation::DeleteApplicationCascade { id } => {
                let app = take_application(&mut next, &id)?;
                next.groups.retain(|g| !app.includes(&g.id));
                for other in &mut next.applications {
                    other.group_ids.retain(|g| !app.includes(g));
                }
            }

            Mutation::AttachGroup { application_id, group_id } => {
                if !next.has_group(&group_id) {
                    return Err(not_found(EntityKind::Group, &group_id));
                }
                let app = next
                    .application_mut(&application_id)
                    .ok_or_else(|| not_found(EntityKind::Application, &application_id))?;
                if !app.includes(&group_id) {
                    app.group_ids.push(group_id.clone());
                }
                app.updated_at = Some(now);
                link_groups(&mut next, &application_id, &[group_id]);
            }

            Mutation::DetachGroup { application_id, group_id } => {
                let app = next
                    .application_mut(&application_id)
                    .ok_or_else(|| not_found(EntityKind::Application, &application_id))?;
                if !app.includes(&group_id) {
                    return Err(MutationError::EdgeNotFound {
                        from: application_id,
                        to: group_id,
                    });
                }
                app.group_ids.retain(|g| *g != group_id);
                app.updated_at = Some(now);
                unlink_groups(&mut next, &application_id, &[group_id]);
            }

            Mutation::CreateGroup(mut group) => {
                if group.id.trim().is_empty() {
                    group.id = generate_id(EntityKind::Group, &group.name, now);
                }
                if next.has_group(&group.id) {
                    return Err(already_exists(EntityKind::Group, &group.id));
                }
                for service in &mut group.services {
                    service.group_id = group.id.clone();
                }
                next.groups.push(group);
            }

            Mutation::UpdateGroup(mut group) => {
                let slot = next
                    .group_mut(&group.id)
                    .ok_or_else(|| not_found(EntityKind::Group, &group.id))?;
                group.services = std::mem::take(&mut slot.services);
                *slot = group;
            }

            Mutation::DeleteGroup { id } => {
                let group = next.group(&id).ok_or_else(|| not_found(EntityKind::Group, &id))?;
                if !group.services.is_empty() {
                    return Err(MutationError::GroupNotEmpty {
                        services: group.services.len(),
                        id,
                    });
                }
                remove_group(&mut next, &id);
            }

            Mutation::DeleteGroupCascade { id } => {
                if !next.has_group(&id) {
                    return Err(not_found(EntityKind::Group, &id));
                }
                remove_group(&mut next, &id);
            }

            Mutation::AddGroupDependency { group_id, depends_on } => {
                let group = next
                    .group_mut(&group_id)
                    .ok_or_else(|| not_found(EntityKind::Group, &group_id))?;
                if !group.depends_on(&depends_on) {
                    group.dependencies.push(depends_on);
                }
            }

            Mutation::RemoveGroupDependency { group_id, depends_on } => {
                let group = next
                    .group_mut(&group_id)
                    .ok_or_else(|| not_found(EntityKind::Group, &group_id))?;
                if !group.depends_on(&depends_on) {
                    return Err(MutationError::EdgeNotFound {
                        from: group_id,
                        to: depends_on,
                    });
                }
                group.dependencies.retain(|d| *d != depends_on);
            }

            Mutation::CreateService(mut service) => {
                if service.id.trim().is_empty() {
                    service.id = generate_id(EntityKind::Service, &service.name, now);
                }
                if next.has_service(&service.id) {
                    return Err(already_exists(EntityKind::Service, &service.id));
                }
                service.clear_runtime();
                service.status = ServiceStatus::Stopped;
                let group = next
                    .group_mut(&service.group_id)
                    .ok_or_else(|| not_found(EntityKind::Group, &service.group_id))?;
                group.services.push(service);
            }

            Mutation::UpdateService(mut service) => {
                let (current_group, existing) = next
                    .find_service(&service.id)
                    .map(|(g, s)| (g.id.clone(), s.clone()))
                    .ok_or_else(|| not_found(EntityKind::Service, &service.id))?;
                service.adopt_runtime(&existing);

                if service.group_id == current_group {
                    if let Some(slot) = next.service_mut(&service.id) {
                        *slot = service;
                    }
                } else {
                    if !next.has_group(&service.group_id) {
                        return Err(not_found(EntityKind::Group, &service.group_id));
                    }
                    if let Some(group) = next.group_mut(&current_group) {
                        group.services.retain(|s| s.id != service.id);
                    }
                    if let Some(group) = next.group_mut(&service.group_id) {
                        group.services.push(service);
                    }
                }
            }

            Mutation::DeleteService { id } => {
                let group_id = next
                    .find_service(&id)
                    .map(|(g, _)| g.id.clone())
                    .ok_or_else(|| not_found(EntityKind::Service, &id))?;
                if let Some(group) = next.group_mut(&group_id) {
                    group.services.retain(|s| s.id != id);
                }
            }

            Mutation::AddServiceDependency { service_id, dependency } => {
                next.service_mut(&service_id)
                    .ok_or_else(|| not_found(EntityKind::Service, &service_id))?
                    .add_dependency(dependency);
            }

            Mutation::RemoveServiceDependency { service_id, depends_on } => {
                let service = next
                    .service_mut(&service_id)
                    .ok_or_else(|| not_found(EntityKind::Service, &service_id))?;
                if !service.remove_dependency(&depends_on) {
                    return Err(MutationError::EdgeNotFound {
                        from: service_id,
                        to: depends_on,
                    });
                }
            }

            Mutation::UpdateSettings(settings) => {
                next.settings = settings;
            }

            Mutation::ReplaceConfig(config) => {
                next = config;
            }
        }

        Ok(next)
    }
}

fn not_found(kind: EntityKind, id: &str) -> MutationError {
    MutationError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn already_exists(kind: EntityKind, id: &str) -> MutationError {
    MutationError::AlreadyExists {
        kind,
        id: id.to_string(),
    }
}

fn take_application(config: &mut Config, id: &str) -> Result<Application, MutationError> {
    let pos = config
        .applications
        .iter()
        .position(|a| a.id == id)
        .ok_or_else(|| not_found(EntityKind::Application, id))?;
    Ok(config.applications.remove(pos))
}

/// Removes a group and detaches it from every application; group
/// dependencies on it are left for the validator to reject
fn remove_group(config: &mut Config, id: &str) {
    config.groups.retain(|g| g.id != id);
    for app in &mut config.applications {
        app.group_ids.retain(|g| g != id);
    }
}

fn link_groups(config: &mut Config, app_id: &str, group_ids: &[String]) {
    for group in &mut config.groups {
        if group_ids.contains(&group.id) {
            group.application_id = Some(app_id.to_string());
        }
    }
}

fn unlink_groups(config: &mut Config, app_id: &str, group_ids: &[String]) {
    for group in &mut config.groups {
        if group_ids.contains(&group.id) && group.application_id.as_deref() == Some(app_id) {
            group.application_id = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        let mut db = ServiceGroup::new("db", "Database");
        db.services.push(Service::new("pg", "Postgres", "db", "/bin/pg"));
        let mut api = ServiceGroup::new("api", "API");
        api.dependencies = vec!["db".to_string()];
        let mut app = Application::new("shop", "Shop");
        app.group_ids = vec!["db".to_string(), "api".to_string()];

        Config {
            groups: vec![db, api],
            applications: vec![app],
            ..Config::default()
        }
    }

    #[test]
    fn apply_leaves_base_untouched() {
        let base = base();
        let next = Mutation::DeleteGroupCascade { id: "db".to_string() }
            .apply(&base, Utc::now())
            .unwrap();

        assert!(base.has_group("db"));
        assert!(!next.has_group("db"));
        assert!(!next.has_service("pg"));
        assert_eq!(next.application("shop").unwrap().group_ids, vec!["api"]);
    }

    #[test]
    fn blank_ids_are_generated() {
        let group = ServiceGroup::new("", "Workers");
        let next = Mutation::CreateGroup(group).apply(&base(), Utc::now()).unwrap();
        let created = next.groups.last().unwrap();
        assert_eq!(EntityKind::of_generated(&created.id), Some(EntityKind::Group));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = Mutation::CreateService(Service::new("pg", "Other", "api", "/bin/x"))
            .apply(&base(), Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            MutationError::AlreadyExists {
                kind: EntityKind::Service,
                id: "pg".to_string()
            }
        );
        assert_eq!(err.field(), "services.pg");
    }

    #[test]
    fn create_service_requires_group() {
        let err = Mutation::CreateService(Service::new("x", "X", "nowhere", "/bin/x"))
            .apply(&base(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, MutationError::NotFound { kind: EntityKind::Group, .. }));
    }

    #[test]
    fn delete_non_empty_group_needs_cascade() {
        let err = Mutation::DeleteGroup { id: "db".to_string() }
            .apply(&base(), Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            MutationError::GroupNotEmpty {
                id: "db".to_string(),
                services: 1
            }
        );
    }

    #[test]
    fn update_service_keeps_runtime_and_moves_group() {
        let mut base = base();
        base.service_mut("pg").unwrap().pid = Some(55);

        let mut edited = Service::new("pg", "Postgres 16", "api", "/opt/pg");
        edited.pid = None;
        let next = Mutation::UpdateService(edited).apply(&base, Utc::now()).unwrap();

        let (group, pg) = next.find_service("pg").unwrap();
        assert_eq!(group.id, "api");
        assert_eq!(pg.pid, Some(55));
        assert_eq!(pg.name, "Postgres 16");
        assert!(next.group("db").unwrap().services.is_empty());
    }

    #[test]
    fn update_group_keeps_services() {
        let mut replacement = ServiceGroup::new("db", "Data");
        replacement.order = 3;
        let next = Mutation::UpdateGroup(replacement).apply(&base(), Utc::now()).unwrap();

        let db = next.group("db").unwrap();
        assert_eq!(db.name, "Data");
        assert_eq!(db.order, 3);
        assert!(db.contains("pg"));
    }

    #[test]
    fn attach_and_detach_keep_back_references() {
        let mut base = base();
        base.groups.push(ServiceGroup::new("jobs", "Jobs"));
        let now = Utc::now();

        let attached = Mutation::AttachGroup {
            application_id: "shop".to_string(),
            group_id: "jobs".to_string(),
        }
        .apply(&base, now)
        .unwrap();
        assert_eq!(attached.group("jobs").unwrap().application_id.as_deref(), Some("shop"));
        assert!(attached.application("shop").unwrap().includes("jobs"));

        let detached = Mutation::DetachGroup {
            application_id: "shop".to_string(),
            group_id: "jobs".to_string(),
        }
        .apply(&attached, now)
        .unwrap();
        assert_eq!(detached.group("jobs").unwrap().application_id, None);
    }

    #[test]
    fn delete_application_keeps_groups() {
        let base = Mutation::AttachGroup {
            application_id: "shop".to_string(),
            group_id: "api".to_string(),
        }
        .apply(&base(), Utc::now())
        .unwrap();

        let next = Mutation::DeleteApplication { id: "shop".to_string() }
            .apply(&base, Utc::now())
            .unwrap();
        assert!(next.applications.is_empty());
        assert!(next.has_group("api"));
        assert_eq!(next.group("api").unwrap().application_id, None);
    }

    #[test]
    fn service_dependency_edges() {
        let now = Utc::now();
        let mut base = base();
        base.group_mut("api")
            .unwrap()
            .services
            .push(Service::new("server", "Server", "api", "/bin/server"));

        let next = Mutation::AddServiceDependency {
            service_id: "server".to_string(),
            dependency: DependencyConfig::required("pg"),
        }
        .apply(&base, now)
        .unwrap();
        assert_eq!(next.service("server").unwrap().required_dependencies(), vec!["pg"]);

        let err = Mutation::RemoveServiceDependency {
            service_id: "server".to_string(),
            depends_on: "redis".to_string(),
        }
        .apply(&next, now)
        .unwrap_err();
        assert!(matches!(err, MutationError::EdgeNotFound { .. }));
    }

    #[test]
    fn rejection_carries_field_and_message() {
        let rejection = MutationError::NotFound {
            kind: EntityKind::Group,
            id: "db".to_string(),
        }
        .into_rejection();
        assert!(!rejection.valid);
        assert_eq!(rejection.errors[0].field, "groups.db");
        assert_eq!(rejection.errors[0].message, "group not found: db");
    }
}
