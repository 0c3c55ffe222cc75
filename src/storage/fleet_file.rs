//! File-backed declarative store
//!
//! The fleet lives in `.fleet/fleet.json` as camelCase JSON. Runtime
//! observations are written next to it in `.fleet/run/state.json` so they
//! never leak into the file operators edit and commit.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::config::FLEET_DIR;
use super::repository::ConfigRepository;
use crate::domain::{Config, RuntimeOverlay};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unsupported exchange format: {0} (expected json or yaml)")]
    UnsupportedFormat(String),

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Format used by `export` and `import`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeFormat {
    #[default]
    Json,
    Yaml,
}

impl ExchangeFormat {
    /// Picks the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    pub fn render(&self, config: &Config) -> Result<String> {
        match self {
            Self::Json => {
                serde_json::to_string_pretty(config).context("Failed to serialize fleet as JSON")
            }
            Self::Yaml => serde_yaml::to_string(config).context("Failed to serialize fleet as YAML"),
        }
    }

    pub fn parse(&self, content: &str) -> Result<Config> {
        match self {
            Self::Json => serde_json::from_str(content).context("Failed to parse fleet JSON"),
            Self::Yaml => serde_yaml::from_str(content).context("Failed to parse fleet YAML"),
        }
    }
}

impl FromStr for ExchangeFormat {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(StoreError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Store for the declarative fleet and its runtime overlay
pub struct FleetStore {
    path: PathBuf,
    state_path: PathBuf,
}

impl FleetStore {
    pub fn new(path: impl Into<PathBuf>, state_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state_path: state_path.into(),
        }
    }

    /// Creates the default store for a project
    pub fn for_project(project_root: &Path) -> Self {
        let dir = project_root.join(FLEET_DIR);
        Self::new(dir.join("fleet.json"), dir.join("run").join("state.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Reads the declarative fleet; a missing file is an empty fleet
    pub fn read(&self) -> Result<Config> {
        Ok(read_locked(&self.path)?.unwrap_or_default())
    }

    /// Writes the declarative part of `config`
    pub fn write(&self, config: &Config) -> Result<()> {
        write_locked(&self.path, &config.declarative())
    }

    pub fn read_overlay(&self) -> Result<HashMap<String, RuntimeOverlay>> {
        Ok(read_locked(&self.state_path)?.unwrap_or_default())
    }

    pub fn write_overlay(&self, overlay: &HashMap<String, RuntimeOverlay>) -> Result<()> {
        write_locked(&self.state_path, overlay)
    }

    /// Writes the fleet to `dest` in the given format
    pub fn export(&self, dest: &Path, format: ExchangeFormat) -> Result<()> {
        let config = self.read()?;
        let content = format.render(&config)?;
        fs::write(dest, content)
            .with_context(|| format!("Failed to write export: {}", dest.display()))
    }

    /// Reads a fleet from `src` without storing it
    pub fn import(src: &Path, format: ExchangeFormat) -> Result<Config> {
        let content = fs::read_to_string(src)
            .with_context(|| format!("Failed to read import: {}", src.display()))?;
        format
            .parse(&content)
            .with_context(|| format!("Invalid fleet file: {}", src.display()))
    }
}

impl ConfigRepository for FleetStore {
    fn load_config(&self) -> Result<Config> {
        self.read()
    }

    fn persist_config(&self, config: &Config) -> Result<()> {
        self.write(config)
    }

    fn load_overlay(&self) -> Result<HashMap<String, RuntimeOverlay>> {
        self.read_overlay()
    }

    fn persist_overlay(&self, overlay: &HashMap<String, RuntimeOverlay>) -> Result<()> {
        self.write_overlay(overlay)
    }
}

fn read_locked<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let file =
        File::open(path).with_context(|| format!("Failed to open store: {}", path.display()))?;

    file.lock_shared()
        .with_context(|| format!("Failed to acquire read lock on {}", path.display()))?;

    let mut content = String::new();
    BufReader::new(&file)
        .read_to_string(&mut content)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    if content.trim().is_empty() {
        return Ok(None);
    }

    let value = serde_json::from_str(&content).map_err(|e| StoreError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(Some(value))
}

fn write_locked<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let temp_path = path.with_extension("json.tmp");

    {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

        file.lock_exclusive()
            .with_context(|| format!("Failed to acquire write lock on {}", path.display()))?;

        let mut writer = BufWriter::new(&file);
        serde_json::to_writer_pretty(&mut writer, value).context("Failed to serialize store")?;
        writeln!(writer).context("Failed to write store")?;
        writer.flush().context("Failed to flush store")?;
    }

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
