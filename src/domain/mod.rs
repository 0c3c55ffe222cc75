//! Domain models for procfleet
//!
//! Contains the configuration model, validation and planning logic without
//! any I/O concerns.

mod graph;
mod group;
mod id;
mod mutation;
mod planner;
mod service;
mod snapshot;
mod validator;

pub use graph::{DependencyGraph, GraphError, GraphIndex};
pub use group::{Application, ServiceGroup, StartupStrategy};
pub use id::{generate_id, normalize_id, EntityKind, IdError};
pub use mutation::{Mutation, MutationError};
pub use planner::{Deferral, PlannerError, Scope, StartupPlan, StartupPlanner};
pub use service::{
    CheckTarget, CheckType, DependencyConfig, DependencyType, HealthCheck, HealthCheckConfig,
    HealthStatus, LegacyHealthCheck, Priority, ProcessConfig, ResourceLimits, RetryConfig,
    Service, ServiceStatus, ServiceType, TimeoutConfig,
};
pub use snapshot::{Config, FleetSettings, RuntimeOverlay};
pub use validator::{
    DependencyValidator, Severity, ValidationIssue, ValidationResult, ValidatorOptions,
};
