//! Deterministic startup ordering
//!
//! Plans are produced with round-based Kahn elimination. Each round is one
//! batch: every node whose dependencies are already scheduled. Within a
//! round, nodes are ordered by `order`, then `startupDelay`, then ID, so the
//! same snapshot always produces the same plan.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::error;

use super::graph::{DependencyGraph, GraphIndex};
use super::snapshot::Config;

/// What part of the fleet to plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Scope {
    All,
    Application(String),
    Group(String),
    Service(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => f.write_str("all"),
            Scope::Application(id) => write!(f, "application {}", id),
            Scope::Group(id) => write!(f, "group {}", id),
            Scope::Service(id) => write!(f, "service {}", id),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PlannerError {
    #[error("Unknown {kind}: {id}")]
    UnknownScope { kind: &'static str, id: String },

    /// A cycle survived validation; the plan would be truncated
    #[error("Dependency cycle reached the planner; unscheduled: {}", .unscheduled.join(", "))]
    ContractViolation { unscheduled: Vec<String> },
}

/// A node pushed to a later batch because it conflicts with one already
/// scheduled in the current batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deferral {
    pub id: String,
    pub conflicts_with: String,
    /// Batch the node was pushed out of
    pub batch: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupPlan {
    pub scope: Scope,
    /// Flattened startup order
    pub order: Vec<String>,
    /// Nodes that may start together, in sequence
    pub batches: Vec<Vec<String>>,
    pub deferred: Vec<Deferral>,
}

impl StartupPlan {
    /// Shutdown is the exact reverse of startup
    pub fn shutdown_order(&self) -> Vec<String> {
        self.order.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Sort key for simultaneously eligible nodes
type TieBreak = (i32, i64, String);

struct Node {
    key: TieBreak,
    deps: Vec<String>,
}

pub struct StartupPlanner;

impl StartupPlanner {
    /// Plans a scope of a snapshot that already passed validation
    pub fn plan(config: &Config, scope: Scope) -> Result<StartupPlan, PlannerError> {
        Self::plan_with_index(config, &GraphIndex::build(config), scope)
    }

    /// Same as [`StartupPlanner::plan`] over an index already built for `config`
    pub fn plan_with_index(
        config: &Config,
        index: &GraphIndex,
        scope: Scope,
    ) -> Result<StartupPlan, PlannerError> {
        let (nodes, defer_conflicts) = match &scope {
            Scope::All => {
                let ids: HashSet<String> = index.group_graph().node_ids().cloned().collect();
                (group_nodes(config, index.group_graph(), &ids), false)
            }
            Scope::Application(app_id) => {
                let app = config
                    .application(app_id)
                    .ok_or_else(|| PlannerError::UnknownScope {
                        kind: "application",
                        id: app_id.clone(),
                    })?;
                let mut ids = HashSet::new();
                for group_id in &app.group_ids {
                    ids.extend(index.group_graph().dependency_closure(group_id));
                }
                (group_nodes(config, index.group_graph(), &ids), false)
            }
            Scope::Group(group_id) => {
                if !config.has_group(group_id) {
                    return Err(PlannerError::UnknownScope {
                        kind: "group",
                        id: group_id.clone(),
                    });
                }
                let ids: HashSet<String> = index.services_in(group_id).iter().cloned().collect();
                (service_nodes(config, index, &ids), true)
            }
            Scope::Service(service_id) => {
                if !config.has_service(service_id) {
                    return Err(PlannerError::UnknownScope {
                        kind: "service",
                        id: service_id.clone(),
                    });
                }
                let ids = index.service_graph().dependency_closure(service_id);
                (service_nodes(config, index, &ids), true)
            }
        };

        let conflicts = |a: &str, b: &str| {
            defer_conflicts
                && (config.service(a).is_some_and(|s| s.conflicts_with(b))
                    || config.service(b).is_some_and(|s| s.conflicts_with(a)))
        };

        let (batches, deferred) = kahn(nodes, conflicts).inspect_err(|e| {
            error!(%scope, error = %e, "planner contract violation");
        })?;

        Ok(StartupPlan {
            scope,
            order: batches.iter().flatten().cloned().collect(),
            batches,
            deferred,
        })
    }
}

fn group_nodes(
    config: &Config,
    graph: &DependencyGraph,
    ids: &HashSet<String>,
) -> HashMap<String, Node> {
    ids.iter()
        .filter_map(|id| {
            let group = config.group(id)?;
            let deps = graph
                .dependencies(id)
                .into_iter()
                .filter(|d| ids.contains(d))
                .collect();
            Some((
                id.clone(),
                Node {
                    key: (group.order, group.startup_delay, id.clone()),
                    deps,
                },
            ))
        })
        .collect()
}

fn service_nodes(config: &Config, index: &GraphIndex, ids: &HashSet<String>) -> HashMap<String, Node> {
    ids.iter()
        .filter_map(|id| {
            let service = config.service(id)?;
            // Services inherit their group's order
            let order = index
                .group_of(id)
                .and_then(|g| config.group(g))
                .map_or(0, |g| g.order);
            let deps = index
                .service_graph()
                .dependencies(id)
                .into_iter()
                .filter(|d| ids.contains(d))
                .collect();
            Some((
                id.clone(),
                Node {
                    key: (order, service.startup_delay, id.clone()),
                    deps,
                },
            ))
        })
        .collect()
}

/// Round-based Kahn elimination with conflict deferral
fn kahn(
    nodes: HashMap<String, Node>,
    conflicts: impl Fn(&str, &str) -> bool,
) -> Result<(Vec<Vec<String>>, Vec<Deferral>), PlannerError> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (id, node) in &nodes {
        in_degree.insert(id.as_str(), node.deps.len());
        for dep in &node.deps {
            dependents.entry(dep.as_str()).or_default().push(id.as_str());
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut batches: Vec<Vec<String>> = Vec::new();
    let mut deferred = Vec::new();
    let mut scheduled = 0;

    while !ready.is_empty() {
        ready.sort_by(|a, b| nodes[*a].key.cmp(&nodes[*b].key));

        let mut batch: Vec<&str> = Vec::new();
        let mut next: Vec<&str> = Vec::new();

        for id in ready {
            match batch.iter().find(|other| conflicts(id, **other)) {
                Some(other) => {
                    deferred.push(Deferral {
                        id: id.to_string(),
                        conflicts_with: other.to_string(),
                        batch: batches.len(),
                    });
                    next.push(id);
                }
                None => batch.push(id),
            }
        }

        for id in &batch {
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        next.push(*dependent);
                    }
                }
            }
        }

        scheduled += batch.len();
        batches.push(batch.into_iter().map(str::to_string).collect());
        ready = next;
    }

    if scheduled < nodes.len() {
        let mut unscheduled: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, deg)| *deg > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        unscheduled.sort();
        return Err(PlannerError::ContractViolation { unscheduled });
    }

    Ok((batches, deferred))
}
