//! Service group CLI commands

use anyhow::Result;
use clap::Subcommand;

use super::common::{chosen_id, commit, open_fleet};
use super::output::Output;
use crate::domain::{EntityKind, Mutation, ServiceGroup, StartupStrategy};

#[derive(Subcommand)]
pub enum GroupCommands {
    /// Create a group
    Add {
        /// Display name
        name: String,

        /// Explicit ID (generated from the name when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Startup tie-break; lower starts first
        #[arg(long, default_value = "0")]
        order: i32,

        /// Delay before the group starts in milliseconds
        #[arg(long, default_value = "0")]
        delay: i64,

        /// Group that must be started first (repeatable)
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,

        /// How services inside the group are launched
        #[arg(long)]
        strategy: Option<StartupStrategy>,
    },

    /// List groups
    List,

    /// Remove a group
    Remove {
        /// Group ID
        id: String,

        /// Also remove every service in the group
        #[arg(long)]
        cascade: bool,
    },

    /// Start every service of a group in dependency order
    Start {
        /// Group ID
        id: String,
    },

    /// Stop every service of a group in reverse dependency order
    Stop {
        /// Group ID
        id: String,
    },
}

pub async fn run(cmd: GroupCommands, output: &Output) -> Result<()> {
    match cmd {
        GroupCommands::Add {
            name,
            id,
            order,
            delay,
            depends_on,
            strategy,
        } => {
            let id = chosen_id(id.as_deref(), EntityKind::Group, &name)?;
            let mut group = ServiceGroup::new(id, name);
            group.order = order;
            group.startup_delay = delay;
            group.dependencies = depends_on;
            group.startup_strategy = strategy;

            let (_, fleet) = open_fleet(output)?;
            let done = format!("Created group: {} - {}", group.id, group.name);
            commit(output, &fleet, Mutation::CreateGroup(group), &done)
        }
        GroupCommands::List => list_groups(output),
        GroupCommands::Remove { id, cascade } => {
            let (_, fleet) = open_fleet(output)?;
            let mutation = if cascade {
                Mutation::DeleteGroupCascade { id: id.clone() }
            } else {
                Mutation::DeleteGroup { id: id.clone() }
            };
            commit(output, &fleet, mutation, &format!("Removed group: {}", id))
        }
        GroupCommands::Start { id } => {
            let (_, fleet) = open_fleet(output)?;
            let started = fleet.start_group(&id).await?;
            report(output, "Starting", &id, &started);
            Ok(())
        }
        GroupCommands::Stop { id } => {
            let (_, fleet) = open_fleet(output)?;
            let stopped = fleet.stop_group(&id).await?;
            report(output, "Stopped", &id, &stopped);
            Ok(())
        }
    }
}

fn report(output: &Output, verb: &str, group_id: &str, services: &[String]) {
    if output.is_json() {
        output.data(&serde_json::json!({
            "group": group_id,
            "services": services,
        }));
    } else if services.is_empty() {
        println!("Nothing to do for group {}.", group_id);
    } else {
        output.success(&format!("{} {}: {}", verb, group_id, services.join(", ")));
    }
}

fn list_groups(output: &Output) -> Result<()> {
    let (_, fleet) = open_fleet(output)?;
    let config = fleet.config();

    if output.is_json() {
        let items: Vec<_> = config
            .groups
            .iter()
            .map(|g| {
                serde_json::json!({
                    "id": g.id,
                    "name": g.name,
                    "order": g.order,
                    "startupDelay": g.startup_delay,
                    "dependencies": g.dependencies,
                    "applicationId": g.application_id,
                    "services": g.services.iter().map(|s| &s.id).collect::<Vec<_>>(),
                })
            })
            .collect();
        output.data(&items);
        return Ok(());
    }

    if config.groups.is_empty() {
        println!("No groups defined. Add one with 'fleet group add'.");
        return Ok(());
    }

    println!("{:<16} {:<20} {:>5} {:>8}  DEPENDS ON", "ID", "NAME", "ORDER", "SERVICES");
    println!("{}", "-".repeat(70));
    for g in &config.groups {
        let deps: Vec<&str> = g.dependencies.iter().map(|d| config.group_name(d)).collect();
        println!(
            "{:<16} {:<20} {:>5} {:>8}  {}",
            g.id,
            g.name,
            g.order,
            g.services.len(),
            deps.join(", ")
        );
    }

    Ok(())
}
