//! Generated identifiers for services, groups and applications
//!
//! ID Format: `{prefix}-{7-char-hash}`
//! - Services: `svc-7f2b4c1`
//! - Groups: `grp-9d3e5f2`
//! - Applications: `app-1a2b3c4`
//!
//! Hash is derived from name + creation timestamp, so creating two entities
//! with the same name at different times yields different IDs. Operators may
//! also supply their own IDs (e.g. `db`, `api`); those are used verbatim.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum IdError {
    #[error("ID cannot be blank")]
    Blank,

    #[error("Unknown entity kind: '{0}' (expected service, group or application)")]
    UnknownKind(String),
}

/// The kind of entity an ID names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Service,
    Group,
    Application,
}

impl EntityKind {
    /// Prefix used for generated IDs of this kind
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::Service => "svc",
            EntityKind::Group => "grp",
            EntityKind::Application => "app",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Service => "service",
            EntityKind::Group => "group",
            EntityKind::Application => "application",
        }
    }

    /// Detects the kind of a generated ID from its prefix
    pub fn of_generated(id: &str) -> Option<Self> {
        let (prefix, hash) = id.split_once('-')?;
        if hash.len() != 7 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }

        [EntityKind::Service, EntityKind::Group, EntityKind::Application]
            .into_iter()
            .find(|kind| kind.prefix() == prefix)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EntityKind {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "service" | "svc" => Ok(EntityKind::Service),
            "group" | "grp" => Ok(EntityKind::Group),
            "application" | "app" => Ok(EntityKind::Application),
            other => Err(IdError::UnknownKind(other.to_string())),
        }
    }
}

/// Generates a 7-character hash from name and timestamp
fn generate_hash(name: &str, timestamp: DateTime<Utc>) -> String {
    let input = format!("{}{}", name, timestamp.timestamp_nanos_opt().unwrap_or(0));
    let hash = blake3::hash(input.as_bytes());
    let hex = hash.to_hex();
    hex[..7].to_string()
}

/// Generates a new ID for an entity of the given kind
pub fn generate_id(kind: EntityKind, name: &str, timestamp: DateTime<Utc>) -> String {
    format!("{}-{}", kind.prefix(), generate_hash(name, timestamp))
}

/// Normalizes a user-supplied ID, rejecting blank input
pub fn normalize_id(raw: &str) -> Result<String, IdError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IdError::Blank);
    }
    Ok(trimmed.to_string())
}
