//! Dependency edge CLI commands
//!
//! Edges between services by default; `--group` switches to group edges.

use anyhow::{bail, Result};
use clap::Subcommand;

use super::common::{commit, open_fleet};
use super::output::Output;
use crate::domain::{DependencyConfig, DependencyType, Mutation};

#[derive(Subcommand)]
pub enum DepCommands {
    /// Add a dependency: FROM depends on TO
    ///
    /// Examples:
    ///   fleet dep add api db
    ///   fleet dep add worker cache --type optional
    ///   fleet dep add frontend backend --group
    Add {
        /// Dependent service (or group)
        from: String,

        /// Dependency
        to: String,

        /// Edge between groups instead of services
        #[arg(long)]
        group: bool,

        /// Edge type for service edges (required, optional, conflict)
        #[arg(long = "type", short = 't', default_value = "required")]
        dep_type: DependencyType,

        /// How long to wait for the dependency in milliseconds
        #[arg(long)]
        timeout: Option<i64>,
    },

    /// Remove a dependency
    Remove {
        from: String,

        to: String,

        #[arg(long)]
        group: bool,
    },
}

pub fn run(cmd: DepCommands, output: &Output) -> Result<()> {
    let (_, fleet) = open_fleet(output)?;

    match cmd {
        DepCommands::Add {
            from,
            to,
            group,
            dep_type,
            timeout,
        } => {
            if group {
                if dep_type != DependencyType::Required || timeout.is_some() {
                    bail!("Group dependencies are always required and take no timeout");
                }
                return commit(
                    output,
                    &fleet,
                    Mutation::AddGroupDependency {
                        group_id: from.clone(),
                        depends_on: to.clone(),
                    },
                    &format!("Group {} now depends on {}", from, to),
                );
            }

            let mut dependency = DependencyConfig::new(to.clone(), dep_type);
            dependency.timeout = timeout;
            commit(
                output,
                &fleet,
                Mutation::AddServiceDependency {
                    service_id: from.clone(),
                    dependency,
                },
                &format!("{} now has a {} dependency on {}", from, dep_type.label(), to),
            )
        }
        DepCommands::Remove { from, to, group } => {
            let mutation = if group {
                Mutation::RemoveGroupDependency {
                    group_id: from.clone(),
                    depends_on: to.clone(),
                }
            } else {
                Mutation::RemoveServiceDependency {
                    service_id: from.clone(),
                    depends_on: to.clone(),
                }
            };
            commit(
                output,
                &fleet,
                mutation,
                &format!("{} no longer depends on {}", from, to),
            )
        }
    }
}
