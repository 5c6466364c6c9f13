//! Dependency graph and load ordering
//!
//! Derives provider → dependent edges from required/provided service
//! declarations and computes a deterministic load order: Kahn's algorithm,
//! wave by wave, with equal-depth ties broken by ascending declared
//! priority and then module identity.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::descriptor::ModuleDescriptor;
use crate::error::EngineError;

/// Directed "requires" graph over module identities.
pub struct DependencyGraph {
    nodes: Vec<String>,
    priorities: HashMap<String, i32>,
    /// service name → providing module.
    providers: HashMap<String, String>,
    /// provider module → dependent module. The provider must reach
    /// `Registered` before the dependent may start Phase 2.
    edges: Vec<(String, String)>,
    /// module → required services no module provides.
    missing: HashMap<String, Vec<String>>,
}

/// Deterministic initialization order.
///
/// `waves` groups modules by dependency depth: members of one wave share a
/// depth and have no edge between them, so they may initialize
/// concurrently. `sequence` is the flattened order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOrder {
    pub sequence: Vec<String>,
    pub waves: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph from parsed descriptors.
    ///
    /// Two modules claiming the same provided service name is a
    /// configuration error for the *later* one (first declaration wins,
    /// mirroring the registry's registration rule); rejected modules are
    /// returned alongside the graph and take no part in ordering.
    pub fn build(descriptors: &[ModuleDescriptor]) -> (Self, Vec<(String, EngineError)>) {
        let mut rejected = Vec::new();
        let mut providers: HashMap<String, String> = HashMap::new();
        let mut accepted: Vec<&ModuleDescriptor> = Vec::new();

        for descriptor in descriptors {
            if let Some(service) = &descriptor.provides {
                if let Some(owner) = providers.get(service) {
                    rejected.push((
                        descriptor.identity.clone(),
                        EngineError::DuplicateServiceRegistration {
                            service: service.clone(),
                            owner: owner.clone(),
                        },
                    ));
                    continue;
                }
                providers.insert(service.clone(), descriptor.identity.clone());
            }
            accepted.push(descriptor);
        }

        let mut nodes = Vec::with_capacity(accepted.len());
        let mut priorities = HashMap::with_capacity(accepted.len());
        let mut edges = Vec::new();
        let mut missing: HashMap<String, Vec<String>> = HashMap::new();

        for descriptor in &accepted {
            nodes.push(descriptor.identity.clone());
            priorities.insert(descriptor.identity.clone(), descriptor.priority);
        }
        for descriptor in &accepted {
            for service in &descriptor.requires {
                match providers.get(service) {
                    Some(provider) => {
                        edges.push((provider.clone(), descriptor.identity.clone()));
                    }
                    None => {
                        missing
                            .entry(descriptor.identity.clone())
                            .or_default()
                            .push(service.clone());
                    }
                }
            }
        }

        debug!(
            modules = nodes.len(),
            edges = edges.len(),
            rejected = rejected.len(),
            "dependency graph built"
        );
        (
            Self {
                nodes,
                priorities,
                providers,
                edges,
                missing,
            },
            rejected,
        )
    }

    /// Providing module of a service name, if any.
    pub fn provider_of(&self, service: &str) -> Option<&str> {
        self.providers.get(service).map(String::as_str)
    }

    /// Required services that resolve to no provider, per module.
    pub fn missing(&self) -> &HashMap<String, Vec<String>> {
        &self.missing
    }

    pub fn edges(&self) -> &[(String, String)] {
        &self.edges
    }

    /// Topological sort into priority-ordered waves.
    ///
    /// Fails fast on a cycle, naming its members; no partial order is
    /// attempted.
    pub fn resolve(&self) -> Result<LoadOrder, EngineError> {
        let waves = topo_waves(&self.nodes, &self.edges, |module| {
            (
                self.priorities.get(module).copied().unwrap_or_default(),
                module.to_string(),
            )
        })
        .map_err(|remaining| EngineError::CyclicDependency {
            cycle: name_cycle(&remaining, &self.edges),
        })?;

        let sequence = waves.iter().flatten().cloned().collect();
        Ok(LoadOrder { sequence, waves })
    }
}

/// Kahn's algorithm producing dependency-depth waves. Within a wave, nodes
/// are sorted by the given key. Edges touching unknown nodes are ignored.
/// On a cycle, returns the still-blocked nodes.
pub(crate) fn topo_waves<K: Ord>(
    nodes: &[String],
    edges: &[(String, String)],
    key: impl Fn(&str) -> K,
) -> Result<Vec<Vec<String>>, Vec<String>> {
    let node_set: HashSet<&str> = nodes.iter().map(String::as_str).collect();
    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|n| (n.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (from, to) in edges {
        if !node_set.contains(from.as_str()) || !node_set.contains(to.as_str()) {
            continue;
        }
        dependents.entry(from.as_str()).or_default().push(to.as_str());
        *in_degree.get_mut(to.as_str()).expect("node present") += 1;
    }

    let mut ready: Vec<&str> = nodes
        .iter()
        .map(String::as_str)
        .filter(|n| in_degree[n] == 0)
        .collect();
    let mut waves = Vec::new();
    let mut placed = 0;

    while !ready.is_empty() {
        ready.sort_by_key(|n| key(n));
        let wave: Vec<String> = ready.iter().map(|n| n.to_string()).collect();
        placed += wave.len();

        let mut next: Vec<&str> = Vec::new();
        for node in ready.drain(..) {
            for &dependent in dependents.get(node).into_iter().flatten() {
                let degree = in_degree.get_mut(dependent).expect("node present");
                *degree -= 1;
                if *degree == 0 {
                    next.push(dependent);
                }
            }
        }
        waves.push(wave);
        ready = next;
    }

    if placed != nodes.len() {
        let remaining = nodes
            .iter()
            .filter(|n| in_degree[n.as_str()] > 0)
            .cloned()
            .collect();
        return Err(remaining);
    }
    Ok(waves)
}

/// Walk the blocked subgraph until a node repeats, to name an actual cycle
/// like `a -> b -> a` in the error.
fn name_cycle(remaining: &[String], edges: &[(String, String)]) -> String {
    let blocked: HashSet<&str> = remaining.iter().map(String::as_str).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, to) in edges {
        if blocked.contains(from.as_str()) && blocked.contains(to.as_str()) {
            adjacency.entry(from.as_str()).or_default().push(to.as_str());
        }
    }

    // Follow first successors until a node repeats. Some blocked nodes
    // only hang off a cycle without sitting on one, so try each start.
    for start in remaining {
        let mut path: Vec<&str> = vec![start.as_str()];
        let mut seen: HashMap<&str, usize> = HashMap::from([(start.as_str(), 0)]);
        let mut node = start.as_str();
        while let Some(&next) = adjacency.get(node).and_then(|d| d.first()) {
            if let Some(&at) = seen.get(next) {
                let mut cycle: Vec<&str> = path[at..].to_vec();
                cycle.push(next);
                return cycle.join(" -> ");
            }
            seen.insert(next, path.len());
            path.push(next);
            node = next;
        }
    }
    remaining.join(", ")
}
