//! Dependency graph construction and wave ordering

use crate::error::{ConvoyError, ConvoyResult};
use crate::graph::component::{validate_name, Component};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Index of a component in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Node {
    component: Component,
    dependencies: Vec<NodeId>,
    dependents: Vec<NodeId>,
}

/// A set of components that may run concurrently.
///
/// Every dependency of a member belongs to a strictly earlier wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wave {
    pub index: usize,
    /// Sorted by name
    pub components: Vec<String>,
}

impl Wave {
    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

/// A validated, acyclic component graph
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    by_name: HashMap<String, NodeId>,
}

impl DependencyGraph {
    /// Validate a flat component set into a DAG.
    ///
    /// Fails on duplicate or unsafe names, dependencies on components outside
    /// the set, and cycles. No partial graph is ever returned.
    pub fn build(components: impl IntoIterator<Item = Component>) -> ConvoyResult<Self> {
        let mut nodes = Vec::new();
        let mut by_name = HashMap::new();

        for component in components {
            validate_name(&component.name)?;
            if by_name.contains_key(&component.name) {
                return Err(ConvoyError::DuplicateComponent(component.name));
            }
            let id = NodeId(nodes.len());
            by_name.insert(component.name.clone(), id);
            nodes.push(Node {
                component,
                dependencies: Vec::new(),
                dependents: Vec::new(),
            });
        }

        for index in 0..nodes.len() {
            let mut resolved = BTreeSet::new();
            for dep in &nodes[index].component.dependencies {
                let id = by_name
                    .get(dep)
                    .copied()
                    .ok_or_else(|| ConvoyError::UnknownDependency {
                        component: nodes[index].component.name.clone(),
                        dependency: dep.clone(),
                    })?;
                resolved.insert(id);
            }
            for &dep in &resolved {
                nodes[dep.0].dependents.push(NodeId(index));
            }
            nodes[index].dependencies = resolved.into_iter().collect();
        }

        let graph = Self { nodes, by_name };
        // Surface cycles at build time
        graph.topological_waves()?;
        debug!(components = graph.len(), "Built dependency graph");
        Ok(graph)
    }

    /// Order the graph into waves with Kahn's algorithm, removing every
    /// zero in-degree node at once.
    pub fn topological_waves(&self) -> ConvoyResult<Vec<Wave>> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();
        let mut ready: Vec<NodeId> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .map(NodeId)
            .collect();
        let mut placed = 0;
        let mut waves = Vec::new();

        while !ready.is_empty() {
            let mut next = Vec::new();
            for &id in &ready {
                for &dependent in &self.nodes[id.0].dependents {
                    in_degree[dependent.0] -= 1;
                    if in_degree[dependent.0] == 0 {
                        next.push(dependent);
                    }
                }
            }

            placed += ready.len();
            let mut names: Vec<String> = ready.iter().map(|&id| self.name(id).to_string()).collect();
            names.sort();
            waves.push(Wave {
                index: waves.len(),
                components: names,
            });
            ready = next;
        }

        if placed < self.nodes.len() {
            let mut remaining: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, &degree)| degree > 0)
                .map(|(i, _)| self.nodes[i].component.name.clone())
                .collect();
            remaining.sort();
            return Err(ConvoyError::CycleDetected(remaining));
        }

        Ok(waves)
    }

    pub fn id(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&Component> {
        self.id(name).map(|id| &self.nodes[id.0].component)
    }

    pub fn component(&self, id: NodeId) -> &Component {
        &self.nodes[id.0].component
    }

    fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].component.name
    }

    /// Direct dependencies of `name`, sorted
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.neighbours(name, |n| &n.dependencies)
    }

    /// Components that directly depend on `name`, sorted
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbours(name, |n| &n.dependents)
    }

    fn neighbours(&self, name: &str, edges: impl Fn(&Node) -> &Vec<NodeId>) -> Vec<&str> {
        let Some(id) = self.id(name) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = edges(&self.nodes[id.0])
            .iter()
            .map(|&dep| self.name(dep))
            .collect();
        names.sort_unstable();
        names
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.nodes.iter().map(|n| &n.component)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
