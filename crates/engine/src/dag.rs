//! Plan validation — run this before executing a plan.
//!
//! Rules enforced:
//! 1. Logical resource names must be unique within the plan.
//! 2. Every deferred field must trace to a declared resource.
//! 3. The discovered dependency graph must be acyclic.
//!
//! Returns the validated [`DependencyGraph`] on success. Validation failures
//! abort the plan before any provider call is made.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::EngineError;
use crate::graph::DependencyGraph;
use crate::models::ResourceNode;

/// Validate the plan's resource set and return its dependency graph.
///
/// # Errors
/// - [`EngineError::DuplicateResourceName`] if two resources share a name.
/// - [`EngineError::DanglingReference`] if a field references a missing resource.
/// - [`EngineError::UnproducedField`] if a pending deferred field has no
///   producer at all.
/// - [`EngineError::CyclicDependency`] if the graph is not acyclic; the error
///   carries one witness cycle path.
pub fn validate(nodes: &[ResourceNode]) -> Result<DependencyGraph, EngineError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for node in nodes {
        if !seen.insert(node.name.as_str()) {
            return Err(EngineError::DuplicateResourceName(node.name.clone()));
        }
    }

    let graph = DependencyGraph::build(nodes)?;

    if let Some(path) = find_cycle(&graph) {
        return Err(EngineError::CyclicDependency { path });
    }

    Ok(graph)
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    White,
    Grey,
    Black,
}

/// Three-color depth-first search; returns a witness cycle path if one exists.
fn find_cycle(graph: &DependencyGraph) -> Option<Vec<String>> {
    let mut marks: HashMap<&str, Mark> =
        graph.names().iter().map(|n| (n.as_str(), Mark::White)).collect();

    for name in graph.names() {
        if marks[name.as_str()] == Mark::White {
            let mut stack = Vec::new();
            if let Some(path) = dfs(name, graph, &mut marks, &mut stack) {
                return Some(path);
            }
        }
    }
    None
}

fn dfs<'a>(
    node: &'a str,
    graph: &'a DependencyGraph,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<String>,
) -> Option<Vec<String>> {
    marks.insert(node, Mark::Grey);
    stack.push(node.to_string());

    for dependent in graph.dependents(node) {
        match marks.get(dependent).copied().unwrap_or(Mark::White) {
            Mark::Grey => {
                // Back-edge: the cycle is the stack suffix from `dependent`,
                // closed by repeating it.
                let start = stack.iter().position(|n| n == dependent).unwrap_or(0);
                let mut path = stack[start..].to_vec();
                path.push(dependent.to_string());
                return Some(path);
            }
            Mark::White => {
                if let Some(path) = dfs(dependent, graph, marks, stack) {
                    return Some(path);
                }
            }
            Mark::Black => {}
        }
    }

    stack.pop();
    marks.insert(node, Mark::Black);
    None
}

/// Frontier sets of a validated (acyclic) graph: wave N contains the nodes
/// whose predecessors all sit in earlier waves. Useful for display; the
/// executor itself schedules per-node, not per-wave.
pub fn execution_waves(graph: &DependencyGraph) -> Vec<Vec<String>> {
    let mut remaining = graph.in_degrees();
    let mut frontier: VecDeque<String> = graph
        .names()
        .iter()
        .filter(|n| remaining.get(n.as_str()) == Some(&0))
        .cloned()
        .collect();
    let mut waves = Vec::new();

    while !frontier.is_empty() {
        let wave: Vec<String> = frontier.drain(..).collect();
        for name in &wave {
            for dependent in graph.dependents(name) {
                if let Some(degree) = remaining.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        frontier.push_back(dependent.to_string());
                    }
                }
            }
        }
        waves.push(wave);
    }

    waves
}
