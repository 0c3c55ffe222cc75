//! Helpers shared by the command modules

use anyhow::{bail, Result};
use chrono::Utc;

use super::output::Output;
use crate::domain::{generate_id, normalize_id, EntityKind, Mutation};
use crate::engine::{Fleet, MutationOutcome};
use crate::storage::Project;

/// Opens the current project and its fleet
pub fn open_fleet(output: &Output) -> Result<(Project, Fleet)> {
    let project = Project::open_current()?;
    output.verbose(&format!("Opened project at: {}", project.root().display()));
    let fleet = Fleet::for_project(&project)?;
    Ok((project, fleet))
}

/// Proposes a change and reports the outcome
///
/// A rejection prints every issue and fails the command.
pub fn commit(output: &Output, fleet: &Fleet, mutation: Mutation, done: &str) -> Result<()> {
    let description = mutation.describe();
    output.verbose_ctx("mutation", &description);

    match fleet.propose_mutation(mutation)? {
        MutationOutcome::Committed { warnings, .. } => {
            output.warnings(&warnings);
            if output.is_json() {
                output.data(&serde_json::json!({
                    "success": true,
                    "message": done,
                    "warnings": warnings,
                }));
            } else {
                output.success(done);
            }
            Ok(())
        }
        MutationOutcome::Rejected(result) => {
            output.validation(&result);
            bail!(
                "Rejected {}: {} error(s)",
                description,
                result.errors.len()
            )
        }
    }
}

/// Uses `explicit` when given, else generates an ID from the name
pub fn chosen_id(explicit: Option<&str>, kind: EntityKind, name: &str) -> Result<String> {
    match explicit {
        Some(raw) => Ok(normalize_id(raw)?),
        None => Ok(generate_id(kind, name, Utc::now())),
    }
}

/// Parses `KEY=VALUE` pairs
pub fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}
