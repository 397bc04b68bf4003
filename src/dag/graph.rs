// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::ConfigFile;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct JobNode {
    /// Jobs that must be COMPLETED before this one may run.
    deps: BTreeSet<String>,
    /// Jobs that list this one in their `after`.
    dependents: BTreeSet<String>,
}

/// In-memory dependency graph keyed by job id.
///
/// Acyclicity is already validated in `config::validate`; this keeps
/// adjacency information for planning and diagnostics.
#[derive(Debug, Clone)]
pub struct JobGraph {
    nodes: BTreeMap<String, JobNode>,
}

impl JobGraph {
    /// Build the graph from a validated [`ConfigFile`].
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let mut nodes: BTreeMap<String, JobNode> = cfg
            .job
            .iter()
            .map(|(id, job)| {
                (
                    id.clone(),
                    JobNode {
                        deps: job.after.iter().cloned().collect(),
                        dependents: BTreeSet::new(),
                    },
                )
            })
            .collect();

        for (id, job) in cfg.job.iter() {
            for dep in job.after.iter() {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.insert(id.clone());
                }
            }
        }

        Self { nodes }
    }

    pub fn jobs(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    /// Immediate dependencies of a job (its `after` set).
    pub fn dependencies_of(&self, job_id: &str) -> Vec<&str> {
        self.nodes
            .get(job_id)
            .map(|n| n.deps.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }

    /// Immediate dependents of a job.
    pub fn dependents_of(&self, job_id: &str) -> Vec<&str> {
        self.nodes
            .get(job_id)
            .map(|n| n.dependents.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }

    /// Jobs with no dependencies.
    pub fn roots(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.deps.is_empty())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Jobs in an order where every job comes after all of its dependencies.
    ///
    /// Returns `None` if the graph has a cycle, which a validated config
    /// never has.
    pub fn execution_order(&self) -> Option<Vec<&str>> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for id in self.nodes.keys() {
            graph.add_node(id.as_str());
        }
        for (id, node) in self.nodes.iter() {
            for dep in node.deps.iter() {
                graph.add_edge(dep.as_str(), id.as_str(), ());
            }
        }
        toposort(&graph, None).ok()
    }
}
