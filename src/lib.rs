//! procfleet - a dependency-aware local process fleet manager
//!
//! An operator declares services, groups them into startup units and
//! applications, and wires explicit dependencies between them. procfleet
//! proves every configuration acyclic and referentially sound before it may
//! drive startup, and merges live process observations into one consistent
//! view of the fleet.
//!
//! - [`domain`] - the configuration model, validator and planner
//! - [`runtime`] - process collaborators and reconciliation
//! - [`storage`] - files, project layout and the snapshot cache
//! - [`engine`] - [`Fleet`], the entry point tying them together

pub mod cli;
pub mod domain;
pub mod engine;
pub mod runtime;
pub mod storage;

pub use domain::{Config, DependencyValidator, Mutation, Scope, StartupPlanner, ValidationResult};
pub use engine::{Fleet, FleetOptions, MutationOutcome, ReconciledView};
