//! Circular-dependency detection over not-yet-installed distributions.
//!
//! Builds a directed graph with an edge `A -> B` whenever a package
//! required by `A` is provided by `B`, then reports every distribution
//! sitting on a strongly connected component of size greater than one
//! (or a self-loop). Cycle paths are canonicalized to the
//! lexicographically smallest rotation of distvnames so reports are
//! deterministic.

use ahash::{AHashMap, AHashSet};
use caravan_core::PackageName;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::VecDeque;

/// One not-yet-installed distribution fed to the detector.
#[derive(Debug, Clone)]
struct Entry {
    distfile: String,
    distvname: String,
    provides: Vec<PackageName>,
    requires: Vec<PackageName>,
}

/// Cycle finder over the dependency graph of pending distributions.
#[derive(Debug, Default)]
pub struct CircularDependency {
    entries: Vec<Entry>,
    graph: DiGraph<usize, ()>,
    finalized: bool,
}

impl CircularDependency {
    /// An empty detector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one distribution's provides and requirements.
    pub fn add(
        &mut self,
        distfile: impl Into<String>,
        distvname: impl Into<String>,
        provides: Vec<PackageName>,
        requires: Vec<PackageName>,
    ) {
        self.entries.push(Entry {
            distfile: distfile.into(),
            distvname: distvname.into(),
            provides,
            requires,
        });
    }

    /// Build the dependency graph. Must be called before [`detect`].
    ///
    /// [`detect`]: CircularDependency::detect
    pub fn finalize(&mut self) {
        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..self.entries.len()).map(|i| graph.add_node(i)).collect();

        // package -> providing node
        let mut providers: AHashMap<&PackageName, NodeIndex> = AHashMap::new();
        for (entry, &node) in self.entries.iter().zip(&nodes) {
            for package in &entry.provides {
                providers.entry(package).or_insert(node);
            }
        }

        for (entry, &node) in self.entries.iter().zip(&nodes) {
            for package in &entry.requires {
                if let Some(&provider) = providers.get(package)
                    && !graph.contains_edge(node, provider)
                {
                    graph.add_edge(node, provider, ());
                }
            }
        }

        self.graph = graph;
        self.finalized = true;
    }

    /// Map every distribution on a cycle to its canonical cycle path of
    /// distvnames.
    #[must_use]
    pub fn detect(&self) -> AHashMap<String, Vec<String>> {
        debug_assert!(self.finalized, "detect() called before finalize()");
        let mut result = AHashMap::new();

        for scc in tarjan_scc(&self.graph) {
            let cyclic = scc.len() > 1
                || scc
                    .first()
                    .is_some_and(|&n| self.graph.contains_edge(n, n));
            if !cyclic {
                continue;
            }
            let members: AHashSet<NodeIndex> = scc.iter().copied().collect();
            for &node in &scc {
                let cycle = self.shortest_cycle_through(node, &members);
                let path = canonical_rotation(
                    cycle
                        .into_iter()
                        .map(|n| self.entries[self.graph[n]].distvname.clone())
                        .collect(),
                );
                let distfile = self.entries[self.graph[node]].distfile.clone();
                result.insert(distfile, path);
            }
        }

        result
    }

    /// Shortest cycle through `start` inside one strongly connected
    /// component, found by BFS with sorted adjacency for determinism.
    fn shortest_cycle_through(
        &self,
        start: NodeIndex,
        members: &AHashSet<NodeIndex>,
    ) -> Vec<NodeIndex> {
        if self.graph.contains_edge(start, start) {
            return vec![start];
        }

        let mut parent: AHashMap<NodeIndex, NodeIndex> = AHashMap::new();
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            let mut neighbors: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .filter(|n| members.contains(n))
                .collect();
            neighbors.sort_by(|a, b| {
                self.entries[self.graph[*a]]
                    .distvname
                    .cmp(&self.entries[self.graph[*b]].distvname)
            });

            for next in neighbors {
                if next == start {
                    // Closed the loop; walk parents back to start.
                    let mut path = vec![node];
                    let mut cur = node;
                    while let Some(&p) = parent.get(&cur) {
                        path.push(p);
                        cur = p;
                    }
                    path.reverse();
                    return path;
                }
                if !parent.contains_key(&next) {
                    parent.insert(next, node);
                    queue.push_back(next);
                }
            }
        }

        // Strong connectivity guarantees the loop above returns.
        vec![start]
    }
}

/// Rotate a cycle to its lexicographically smallest form.
fn canonical_rotation(cycle: Vec<String>) -> Vec<String> {
    if cycle.is_empty() {
        return cycle;
    }
    let mut best = cycle.clone();
    for shift in 1..cycle.len() {
        let mut rotated = Vec::with_capacity(cycle.len());
        rotated.extend_from_slice(&cycle[shift..]);
        rotated.extend_from_slice(&cycle[..shift]);
        if rotated < best {
            best = rotated;
        }
    }
    best
}

/// Format a cycle path as `A -> B -> A`.
#[must_use]
pub fn format_cycle(path: &[String]) -> String {
    let mut parts: Vec<&str> = path.iter().map(String::as_str).collect();
    if let Some(first) = parts.first().copied() {
        parts.push(first);
    }
    parts.join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkgs(names: &[&str]) -> Vec<PackageName> {
        names.iter().map(|n| PackageName::new(n)).collect()
    }

    #[test]
    fn mutual_dependency_is_a_cycle() {
        let mut detector = CircularDependency::new();
        detector.add("A-1.0.tar.gz", "A-1.0", pkgs(&["A"]), pkgs(&["B"]));
        detector.add("B-1.0.tar.gz", "B-1.0", pkgs(&["B"]), pkgs(&["A"]));
        detector.finalize();

        let cycles = detector.detect();
        assert_eq!(cycles.len(), 2);
        let path = &cycles["A-1.0.tar.gz"];
        assert_eq!(path, &vec!["A-1.0".to_string(), "B-1.0".to_string()]);
        assert_eq!(cycles["B-1.0.tar.gz"], cycles["A-1.0.tar.gz"]);
        assert_eq!(format_cycle(path), "A-1.0 -> B-1.0 -> A-1.0");
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut detector = CircularDependency::new();
        detector.add("A-1.0.tar.gz", "A-1.0", pkgs(&["A", "A.Util"]), pkgs(&["A.Util"]));
        detector.finalize();

        let cycles = detector.detect();
        assert_eq!(cycles["A-1.0.tar.gz"], vec!["A-1.0".to_string()]);
        assert_eq!(format_cycle(&cycles["A-1.0.tar.gz"]), "A-1.0 -> A-1.0");
    }

    #[test]
    fn chains_are_not_cycles() {
        let mut detector = CircularDependency::new();
        detector.add("A-1.0.tar.gz", "A-1.0", pkgs(&["A"]), pkgs(&["B"]));
        detector.add("B-1.0.tar.gz", "B-1.0", pkgs(&["B"]), pkgs(&["C"]));
        detector.add("C-1.0.tar.gz", "C-1.0", pkgs(&["C"]), vec![]);
        detector.finalize();

        assert!(detector.detect().is_empty());
    }

    #[test]
    fn three_way_cycle_reports_smallest_rotation() {
        let mut detector = CircularDependency::new();
        detector.add("C-1.0.tar.gz", "C-1.0", pkgs(&["C"]), pkgs(&["A"]));
        detector.add("A-1.0.tar.gz", "A-1.0", pkgs(&["A"]), pkgs(&["B"]));
        detector.add("B-1.0.tar.gz", "B-1.0", pkgs(&["B"]), pkgs(&["C"]));
        detector.finalize();

        let cycles = detector.detect();
        for path in cycles.values() {
            assert_eq!(path[0], "A-1.0", "rotation must start at the smallest name");
        }
        assert_eq!(
            format_cycle(&cycles["A-1.0.tar.gz"]),
            "A-1.0 -> B-1.0 -> C-1.0 -> A-1.0"
        );
    }

    #[test]
    fn unknown_requirements_are_ignored() {
        let mut detector = CircularDependency::new();
        detector.add("A-1.0.tar.gz", "A-1.0", pkgs(&["A"]), pkgs(&["NotProvided"]));
        detector.finalize();
        assert!(detector.detect().is_empty());
    }
}
