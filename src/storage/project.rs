//! Project management
//!
//! Handles project initialization and provides access to stores.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

use super::config::{ToolConfig, FLEET_DIR};
use super::fleet_file::FleetStore;
use crate::runtime::LocalProcessProbe;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Not in a fleet project. Run 'fleet init' first.")]
    NotInProject,
}

const DEFAULT_CONFIG: &str = r#"# procfleet configuration

[poll]
# Interval between reconciliation passes
interval_ms = 5000
# Age after which status output is flagged as stale
stale_after_ms = 15000
# How long start/stop/restart statuses are kept before observations win
settle_ms = 2000

[planner]
# Reject auto-start services that conflict and would start in the same batch
reject_autostart_conflicts = false
"#;

const GITIGNORE: &str = r#"# Runtime state (pid files, logs, observed status)
run/
"#;

/// A fleet project rooted at a directory containing `.fleet/`
#[derive(Debug)]
pub struct Project {
    root: PathBuf,
    config: ToolConfig,
}

impl Project {
    /// Opens an existing project at the given path
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        if !root.join(FLEET_DIR).is_dir() {
            return Err(ProjectError::NotInProject.into());
        }

        let config = ToolConfig::for_project(&root)?;

        Ok(Self { root, config })
    }

    /// Opens the project at the current directory or a parent
    pub fn open_current() -> Result<Self> {
        let root = ToolConfig::find_project_root().ok_or(ProjectError::NotInProject)?;

        Self::open(root)
    }

    /// Initializes a new project at the given path
    ///
    /// Existing files are left alone, so running this twice is harmless.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let fleet_dir = root.join(FLEET_DIR);

        let run_dir = fleet_dir.join("run");
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("Failed to create run directory: {}", run_dir.display()))?;

        let config_path = fleet_dir.join("config.toml");
        if !config_path.exists() {
            fs::write(&config_path, DEFAULT_CONFIG)
                .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
        }

        let gitignore_path = fleet_dir.join(".gitignore");
        if !gitignore_path.exists() {
            fs::write(&gitignore_path, GITIGNORE).with_context(|| {
                format!("Failed to write .gitignore: {}", gitignore_path.display())
            })?;
        }

        let store = FleetStore::for_project(&root);
        if !store.path().exists() {
            store.write(&Default::default())?;
        }

        Self::open(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the .fleet directory path
    pub fn fleet_dir(&self) -> PathBuf {
        self.root.join(FLEET_DIR)
    }

    pub fn run_dir(&self) -> PathBuf {
        self.fleet_dir().join("run")
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    pub fn store(&self) -> FleetStore {
        FleetStore::for_project(&self.root)
    }

    /// Returns the process collaborator for this host
    pub fn probe(&self) -> LocalProcessProbe {
        LocalProcessProbe::new(self.run_dir(), &self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Config;
    use tempfile::TempDir;

    #[test]
    fn init_creates_structure() {
        let dir = TempDir::new().unwrap();
        let project = Project::init(dir.path()).unwrap();

        assert!(project.fleet_dir().is_dir());
        assert!(project.run_dir().is_dir());
        assert!(project.fleet_dir().join("config.toml").is_file());
        assert!(project.fleet_dir().join(".gitignore").is_file());
        assert!(project.store().path().is_file());
        assert_eq!(project.store().read().unwrap(), Config::default());
    }

    #[test]
    fn default_config_file_parses() {
        let dir = TempDir::new().unwrap();
        let project = Project::init(dir.path()).unwrap();

        assert_eq!(project.config().project.poll.interval_ms, 5_000);
        assert!(!project.config().project.planner.reject_autostart_conflicts);
    }

    #[test]
    fn init_is_idempotent() {
        let dir = TempDir::new().unwrap();

        Project::init(dir.path()).unwrap();
        Project::init(dir.path()).unwrap();

        assert!(dir.path().join(FLEET_DIR).is_dir());
    }

    #[test]
    fn open_existing_project() {
        let dir = TempDir::new().unwrap();
        Project::init(dir.path()).unwrap();

        let project = Project::open(dir.path()).unwrap();
        assert_eq!(project.root(), dir.path());
        assert_eq!(project.probe().run_dir(), project.run_dir());
    }

    #[test]
    fn open_non_project_fails() {
        let dir = TempDir::new().unwrap();
        let err = Project::open(dir.path()).unwrap_err();

        assert!(err.to_string().contains("fleet init"));
    }
}
