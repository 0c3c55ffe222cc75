//! # Storage Layer
//!
//! Persistence and caching for procfleet.
//!
//! ## Storage Formats
//!
//! | Data | Format | Location |
//! |------|--------|----------|
//! | Fleet definition | JSON (camelCase) | `.fleet/fleet.json` |
//! | Runtime overlay | JSON | `.fleet/run/state.json` |
//! | Pid files and logs | plain text | `.fleet/run/{id}.pid`, `{id}.log` |
//! | Tool settings | TOML | `.fleet/config.toml` |
//!
//! ## Concurrency Safety
//!
//! - [`FleetStore`] uses file locking (`fs2`) and temp file + rename
//! - [`ConfigStore`] keeps one in-process snapshot behind an `RwLock`, with a
//!   separate commit lock so writers never interleave
//!
//! ## Project Structure
//!
//! ```text
//! .fleet/
//! ├── fleet.json        # Declarative fleet (commit this)
//! ├── config.toml       # Tool settings
//! ├── run/              # Runtime state, ignored by git
//! └── .gitignore
//! ```

mod cache;
mod config;
mod fleet_file;
mod project;
mod repository;

pub use cache::{CachedSnapshot, CommitGuard, ConfigStore};
pub use config::{
    ConfigError, GlobalConfig, OutputFormat, PlannerConfig, PollConfig, ProjectConfig, ToolConfig,
    FLEET_DIR,
};
pub use fleet_file::{ExchangeFormat, FleetStore, StoreError};
pub use project::{Project, ProjectError};
pub use repository::{ConfigRepository, MemoryRepository};
