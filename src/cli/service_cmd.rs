//! Service CLI commands

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Subcommand;

use super::common::{chosen_id, commit, open_fleet, parse_env_pair};
use super::output::Output;
use crate::domain::{DependencyConfig, EntityKind, Mutation, Service};

#[derive(Subcommand)]
pub enum ServiceCommands {
    /// Add a service to a group
    ///
    /// Examples:
    ///   fleet service add Postgres --group backend --path /usr/bin/postgres --id db
    ///   fleet service add API --group backend --path ./api --depends-on db --port 8080
    Add {
        /// Display name
        name: String,

        /// Group that owns the service
        #[arg(long, short)]
        group: String,

        /// Executable to launch
        #[arg(long, short)]
        path: String,

        /// Explicit ID (generated from the name when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Argument passed to the executable (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Working directory
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Environment variable as KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Listening port
        #[arg(long)]
        port: Option<u16>,

        /// Delay before launch in milliseconds
        #[arg(long, default_value = "0")]
        delay: i64,

        /// Start with the fleet
        #[arg(long)]
        auto_start: bool,

        /// Required dependency (repeatable)
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
    },

    /// List services
    List {
        /// Only services of this group
        #[arg(long, short)]
        group: Option<String>,
    },

    /// Show a service definition
    Show {
        /// Service ID
        id: String,
    },

    /// Change fields of a service
    Update {
        /// Service ID
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        path: Option<String>,

        /// Move to another group
        #[arg(long)]
        group: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        delay: Option<i64>,

        #[arg(long)]
        auto_start: Option<bool>,
    },

    /// Remove a service
    Remove {
        /// Service ID
        id: String,
    },

    /// Start a service
    Start {
        /// Service ID
        id: String,
    },

    /// Stop a service
    Stop {
        /// Service ID
        id: String,
    },

    /// Restart a service
    Restart {
        /// Service ID
        id: String,
    },
}

pub async fn run(cmd: ServiceCommands, output: &Output) -> Result<()> {
    match cmd {
        ServiceCommands::Add {
            name,
            group,
            path,
            id,
            args,
            work_dir,
            env,
            port,
            delay,
            auto_start,
            depends_on,
        } => {
            let id = chosen_id(id.as_deref(), EntityKind::Service, &name)?;
            let mut service = Service::new(id, name, group, path);
            service.args = args;
            service.work_dir = work_dir.map(|d| d.display().to_string());
            service.env = env.into_iter().collect();
            service.port = port;
            service.startup_delay = delay;
            service.auto_start = auto_start;
            for dep in depends_on {
                service.add_dependency(DependencyConfig::required(dep));
            }
            add_service(output, service)
        }
        ServiceCommands::List { group } => list_services(output, group.as_deref()),
        ServiceCommands::Show { id } => show_service(output, &id),
        ServiceCommands::Update {
            id,
            name,
            path,
            group,
            port,
            delay,
            auto_start,
        } => {
            let (_, fleet) = open_fleet(output)?;
            let mut service = fleet
                .config()
                .service(&id)
                .cloned()
                .ok_or_else(|| anyhow!("Service not found: {}", id))?;

            if let Some(name) = name {
                service.name = name;
            }
            if let Some(path) = path {
                service.path = path;
            }
            if let Some(group) = group {
                service.group_id = group;
            }
            if port.is_some() {
                service.port = port;
            }
            if let Some(delay) = delay {
                service.startup_delay = delay;
            }
            if let Some(auto_start) = auto_start {
                service.auto_start = auto_start;
            }

            commit(
                output,
                &fleet,
                Mutation::UpdateService(service),
                &format!("Updated service: {}", id),
            )
        }
        ServiceCommands::Remove { id } => {
            let (_, fleet) = open_fleet(output)?;
            commit(
                output,
                &fleet,
                Mutation::DeleteService { id: id.clone() },
                &format!("Removed service: {}", id),
            )
        }
        ServiceCommands::Start { id } => {
            let (_, fleet) = open_fleet(output)?;
            fleet.start_service(&id).await?;
            output.success(&format!("Starting service: {}", id));
            Ok(())
        }
        ServiceCommands::Stop { id } => {
            let (_, fleet) = open_fleet(output)?;
            fleet.stop_service(&id).await?;
            output.success(&format!("Stopped service: {}", id));
            Ok(())
        }
        ServiceCommands::Restart { id } => {
            let (_, fleet) = open_fleet(output)?;
            fleet.restart_service(&id).await?;
            output.success(&format!("Restarting service: {}", id));
            Ok(())
        }
    }
}

fn add_service(output: &Output, service: Service) -> Result<()> {
    let (_, fleet) = open_fleet(output)?;
    let done = format!("Created service: {} - {}", service.id, service.name);
    commit(output, &fleet, Mutation::CreateService(service), &done)
}

fn list_services(output: &Output, group: Option<&str>) -> Result<()> {
    let (_, fleet) = open_fleet(output)?;
    let config = fleet.config();

    let services: Vec<&Service> = config
        .services()
        .filter(|s| group.map_or(true, |g| s.group_id == g))
        .collect();

    if output.is_json() {
        output.data(&services);
    } else if services.is_empty() {
        println!("No services found.");
    } else {
        println!("{:<16} {:<20} {:<14} DEPENDS ON", "ID", "NAME", "GROUP");
        println!("{}", "-".repeat(70));
        for s in services {
            let deps: Vec<String> = s
                .dependency_edges()
                .iter()
                .map(|d| match d.dep_type.affects_order() {
                    true => d.service_id.clone(),
                    false => format!("{} ({})", d.service_id, d.dep_type.label()),
                })
                .collect();
            println!(
                "{:<16} {:<20} {:<14} {}",
                s.id,
                s.name,
                s.group_id,
                deps.join(", ")
            );
        }
    }

    Ok(())
}

fn show_service(output: &Output, id: &str) -> Result<()> {
    let (_, fleet) = open_fleet(output)?;
    let config = fleet.config();
    let service = config
        .service(id)
        .ok_or_else(|| anyhow!("Service not found: {}", id))?;

    if output.is_json() {
        output.data(service);
        return Ok(());
    }

    println!("{} ({})", service.name, service.id);
    println!("  group:      {}", config.group_name(&service.group_id));
    println!("  path:       {}", service.path);
    if !service.args.is_empty() {
        println!("  args:       {}", service.args.join(" "));
    }
    if let Some(dir) = &service.work_dir {
        println!("  work dir:   {}", dir);
    }
    if let Some(port) = service.declared_port() {
        println!("  port:       {}", port);
    }
    println!("  auto start: {}", service.auto_start);
    if service.startup_delay > 0 {
        println!("  delay:      {}ms", service.startup_delay);
    }
    for dep in service.dependency_edges() {
        println!(
            "  {:<10}  {}",
            dep.dep_type.label(),
            config.service_name(&dep.service_id)
        );
    }
    println!("  status:     {}", service.status.as_str());

    Ok(())
}
