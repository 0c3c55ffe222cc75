//! # Command-Line Interface
//!
//! User-facing CLI commands and output formatting.
//!
//! ## Command Groups
//!
//! | Group | Purpose | Examples |
//! |-------|---------|----------|
//! | Core | Project and checks | `init`, `validate`, `plan`, `status` |
//! | Service | Process definitions and control | `service add`, `service start` |
//! | Group | Startup units | `group add`, `group start`, `group remove --cascade` |
//! | App | Labels over groups | `app add`, `app attach` |
//! | Dep | Dependency edges | `dep add api db`, `dep add web api --type optional` |
//! | Exchange | Files in and out | `export fleet.yaml`, `import fleet.json` |
//! | Runtime | Continuous refresh | `watch` |
//!
//! ## Output Formats
//!
//! All commands support `--format` flag:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! ## Verbose Mode
//!
//! Use `--verbose` (or `-v`) for debug output and `debug` level logs:
//! ```bash
//! fleet --verbose status
//! ```
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod app_cmd;
mod common;
mod dep_cmd;
mod group_cmd;
mod output;
mod query;
mod service_cmd;
mod transfer;
mod watch;

pub use app::{run, Cli, Commands};
pub use output::{Output, OutputFormat};
