//! Main CLI application structure

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use super::output::{Output, OutputFormat};
use super::{app_cmd, dep_cmd, group_cmd, query, service_cmd, transfer, watch};
use crate::domain::Scope;
use crate::storage::{ExchangeFormat, Project, ToolConfig};

#[derive(Parser)]
#[command(name = "fleet")]
#[command(author, version, about = "Dependency-aware local process fleet manager")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (defaults to the global config, then text)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output for debugging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new fleet project
    Init {
        /// Path to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,
    },

    /// Check the fleet (or a fleet file) for errors and warnings
    Validate {
        /// JSON or YAML file to check instead of the project fleet
        file: Option<PathBuf>,
    },

    /// Show the startup order
    Plan {
        /// Plan the services of one group
        #[arg(long, conflicts_with_all = ["service", "application"])]
        group: Option<String>,

        /// Plan one service and everything it requires
        #[arg(long, conflicts_with = "application")]
        service: Option<String>,

        /// Plan the groups of one application and their dependencies
        #[arg(long)]
        application: Option<String>,

        /// Print the shutdown order instead
        #[arg(long)]
        shutdown: bool,
    },

    /// Show live status of every service
    Status {
        /// Use the last recorded state without probing processes
        #[arg(long)]
        cached: bool,
    },

    /// Manage services
    #[command(subcommand)]
    Service(service_cmd::ServiceCommands),

    /// Manage service groups
    #[command(subcommand)]
    Group(group_cmd::GroupCommands),

    /// Manage applications
    #[command(subcommand)]
    App(app_cmd::AppCommands),

    /// Manage dependencies between services or groups
    #[command(subcommand)]
    Dep(dep_cmd::DepCommands),

    /// Write the fleet definition to a file
    Export {
        /// Destination (`-` for stdout)
        path: PathBuf,

        /// json or yaml (defaults to the file extension)
        #[arg(long = "as", value_name = "FORMAT")]
        exchange: Option<ExchangeFormat>,
    },

    /// Replace the fleet definition with a file, after validating it
    Import {
        path: PathBuf,

        /// json or yaml (defaults to the file extension)
        #[arg(long = "as", value_name = "FORMAT")]
        exchange: Option<ExchangeFormat>,
    },

    /// Keep status fresh and apply edits to fleet.json as they happen
    Watch {
        /// Refresh interval in milliseconds (defaults to [poll] interval_ms)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Start auto-start services first
        #[arg(long)]
        auto_start: bool,
    },
}

/// Installs the stderr log subscriber; `RUST_LOG` wins over `--verbose`
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "procfleet=debug"
    } else {
        "procfleet=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let format = match cli.format {
        Some(format) => format,
        None => ToolConfig::load()
            .map(|c| OutputFormat::from(c.global.default_format))
            .unwrap_or_default(),
    };
    let output = Output::new(format, cli.verbose);

    output.verbose("fleet starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(dispatch(cli.command, &output))?;

    output.verbose("Command completed successfully");
    Ok(())
}

async fn dispatch(command: Commands, output: &Output) -> Result<()> {
    match command {
        Commands::Init { path } => {
            output.verbose_ctx("init", &format!("Initializing project at: {}", path));
            let project = Project::init(&path)?;
            output.verbose_ctx(
                "init",
                &format!("Created .fleet directory at: {}", project.fleet_dir().display()),
            );
            output.success(&format!(
                "Initialized fleet project at {}",
                project.root().display()
            ));
        }

        Commands::Validate { file } => query::validate(output, file.as_deref())?,

        Commands::Plan {
            group,
            service,
            application,
            shutdown,
        } => {
            let scope = match (group, service, application) {
                (Some(id), _, _) => Scope::Group(id),
                (_, Some(id), _) => Scope::Service(id),
                (_, _, Some(id)) => Scope::Application(id),
                _ => Scope::All,
            };
            query::plan(output, scope, shutdown)?
        }

        Commands::Status { cached } => query::status(output, cached).await?,

        Commands::Service(cmd) => service_cmd::run(cmd, output).await?,
        Commands::Group(cmd) => group_cmd::run(cmd, output).await?,
        Commands::App(cmd) => app_cmd::run(cmd, output)?,
        Commands::Dep(cmd) => dep_cmd::run(cmd, output)?,

        Commands::Export { path, exchange } => transfer::export(output, &path, exchange)?,
        Commands::Import { path, exchange } => transfer::import(output, &path, exchange)?,

        Commands::Watch {
            interval_ms,
            auto_start,
        } => watch::run(output, interval_ms, auto_start).await?,
    }

    Ok(())
}
