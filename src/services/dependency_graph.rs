//! Service dependency graph: cycle detection, startup order and startup waves.
//!
//! Ordering is deterministic: ties are broken by service id so the same
//! descriptor set always starts in the same order.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::domain::errors::ConfigError;
use crate::domain::models::ServiceDescriptor;

/// Adjacency view over a descriptor set: service id -> ids it depends on.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

fn detect_cycle_util<'a>(
    node: &'a str,
    graph: &'a BTreeMap<String, BTreeSet<String>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(node) {
        for neighbor in neighbors {
            let neighbor = neighbor.as_str();
            if !visited.contains(neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(neighbor) {
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

impl DependencyGraph {
    pub fn from_descriptors(descriptors: &[ServiceDescriptor]) -> Self {
        let edges = descriptors
            .iter()
            .map(|d| (d.id.clone(), d.depends_on.clone()))
            .collect();
        Self { edges }
    }

    /// Direct dependencies of a service.
    pub fn dependencies_of(&self, id: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(id)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// Services that directly depend on `id`.
    pub fn dependents_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a str> {
        self.edges
            .iter()
            .filter(move |(_, deps)| deps.contains(id))
            .map(|(service, _)| service.as_str())
    }

    /// Find a dependency cycle. The returned path starts and ends with the
    /// same service, e.g. `[a, b, a]`.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for id in self.edges.keys() {
            if !visited.contains(id.as_str())
                && detect_cycle_util(id, &self.edges, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path.into_iter().map(str::to_string).collect());
            }
        }

        None
    }

    /// Group services into waves: every service in wave `n` depends only on
    /// services in waves `< n`. Services within a wave are independent of each
    /// other and may be started concurrently.
    pub fn waves(&self) -> Result<Vec<Vec<String>>, ConfigError> {
        if let Some(cycle) = self.detect_cycle() {
            return Err(ConfigError::DependencyCycle(cycle));
        }

        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (id, deps) in &self.edges {
            in_degree.entry(id.as_str()).or_insert(0);
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(id.as_str());
                *in_degree.entry(id.as_str()).or_insert(0) += 1;
            }
        }

        // Kahn's algorithm, one frontier at a time
        let mut frontier: Vec<&str> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut waves = Vec::new();
        let mut placed = 0;

        while !frontier.is_empty() {
            let mut next = BTreeSet::new();
            for &node in &frontier {
                for &dependent in dependents.get(node).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(dependent);
                        }
                    }
                }
            }
            placed += frontier.len();
            waves.push(frontier.iter().map(|id| (*id).to_string()).collect());
            frontier = next.into_iter().collect();
        }

        if placed != in_degree.len() {
            return Err(ConfigError::ValidationFailed(
                "topological sort failed: dependency on an unknown service".to_string(),
            ));
        }

        Ok(waves)
    }

    /// Dependencies before dependents.
    pub fn topological_order(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.waves()?.into_iter().flatten().collect())
    }
}
