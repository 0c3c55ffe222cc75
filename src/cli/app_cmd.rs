//! Application CLI commands

use anyhow::Result;
use clap::Subcommand;

use super::common::{chosen_id, commit, open_fleet};
use super::output::Output;
use crate::domain::{Application, EntityKind, Mutation};

#[derive(Subcommand)]
pub enum AppCommands {
    /// Create an application
    Add {
        /// Display name
        name: String,

        /// Explicit ID (generated from the name when omitted)
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Group to include (repeatable)
        #[arg(long = "group", short)]
        groups: Vec<String>,
    },

    /// List applications
    List,

    /// Remove an application
    Remove {
        /// Application ID
        id: String,

        /// Also remove every group the application lists
        #[arg(long)]
        cascade: bool,
    },

    /// Add a group to an application
    Attach {
        /// Application ID
        app: String,

        /// Group ID
        group: String,
    },

    /// Remove a group from an application
    Detach {
        /// Application ID
        app: String,

        /// Group ID
        group: String,
    },
}

pub fn run(cmd: AppCommands, output: &Output) -> Result<()> {
    let (_, fleet) = open_fleet(output)?;

    match cmd {
        AppCommands::Add {
            name,
            id,
            description,
            groups,
        } => {
            let id = chosen_id(id.as_deref(), EntityKind::Application, &name)?;
            let mut app = Application::new(id, name);
            app.description = description;
            app.group_ids = groups;
            let done = format!("Created application: {} - {}", app.id, app.name);
            commit(output, &fleet, Mutation::CreateApplication(app), &done)
        }
        AppCommands::List => {
            let config = fleet.config();
            if output.is_json() {
                output.data(&config.applications);
            } else if config.applications.is_empty() {
                println!("No applications defined.");
            } else {
                println!("{:<16} {:<20} GROUPS", "ID", "NAME");
                println!("{}", "-".repeat(60));
                for app in &config.applications {
                    let groups: Vec<&str> =
                        app.group_ids.iter().map(|g| config.group_name(g)).collect();
                    println!("{:<16} {:<20} {}", app.id, app.name, groups.join(", "));
                }
            }
            Ok(())
        }
        AppCommands::Remove { id, cascade } => {
            let mutation = if cascade {
                Mutation::DeleteApplicationCascade { id: id.clone() }
            } else {
                Mutation::DeleteApplication { id: id.clone() }
            };
            commit(output, &fleet, mutation, &format!("Removed application: {}", id))
        }
        AppCommands::Attach { app, group } => commit(
            output,
            &fleet,
            Mutation::AttachGroup {
                application_id: app.clone(),
                group_id: group.clone(),
            },
            &format!("Attached {} to {}", group, app),
        ),
        AppCommands::Detach { app, group } => commit(
            output,
            &fleet,
            Mutation::DetachGroup {
                application_id: app.clone(),
                group_id: group.clone(),
            },
            &format!("Detached {} from {}", group, app),
        ),
    }
}
