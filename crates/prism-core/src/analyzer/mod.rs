//! Dependency analysis for registered components.
//!
//! Edges are derived from source: a component depends on every registered
//! component it invokes, where an invocation is a call expression or JSX
//! element whose name starts with an uppercase letter. Cycle detection runs
//! over the graph assembled from each component's stored dependency list.

mod syntax;

pub use syntax::{OxcSyntaxProvider, ParsedSource, SyntaxTreeProvider};

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::component::ComponentInfo;
use crate::error::AnalyzerError;

/// Component name -> ordered dependency names.
///
/// A `BTreeMap` keeps key iteration, and therefore cycle reporting, deterministic.
pub type DependencyGraph = BTreeMap<String, Vec<String>>;

/// Derives dependency edges for components of one registry.
///
/// Each [`ComponentRegistry`](crate::ComponentRegistry) owns its own analyzer,
/// so separate registries never share analysis state.
#[derive(Clone)]
pub struct DependencyAnalyzer {
    provider: Arc<dyn SyntaxTreeProvider>,
}

impl DependencyAnalyzer {
    pub fn new(provider: Arc<dyn SyntaxTreeProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn SyntaxTreeProvider> {
        &self.provider
    }

    /// Compute the dependencies of `component` from its source file.
    ///
    /// `is_registered` answers whether a name belongs to a registered
    /// component. Self references and duplicates are dropped; the first
    /// occurrence fixes the order.
    ///
    /// # Errors
    ///
    /// Returns an error only when the source cannot be read or parsed.
    pub fn analyze_component(
        &self,
        component: &ComponentInfo,
        is_registered: impl Fn(&str) -> bool,
    ) -> Result<Vec<String>, AnalyzerError> {
        let parsed = self.provider.parse(&component.file_path)?;
        Ok(component_dependencies(
            &component.name,
            &parsed.callees,
            is_registered,
        ))
    }

    /// Build the graph from each component's stored `dependencies`.
    pub fn dependency_graph<'c>(
        &self,
        components: impl IntoIterator<Item = &'c ComponentInfo>,
    ) -> DependencyGraph {
        components
            .into_iter()
            .map(|component| (component.name.clone(), component.dependencies.clone()))
            .collect()
    }

    pub fn detect_circular_dependencies(&self, graph: &DependencyGraph) -> Vec<Vec<String>> {
        find_cycles(graph)
    }
}

impl Default for DependencyAnalyzer {
    fn default() -> Self {
        Self::new(Arc::new(OxcSyntaxProvider::new()))
    }
}

impl std::fmt::Debug for DependencyAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyAnalyzer").finish_non_exhaustive()
    }
}

/// Filter raw callee names down to component dependencies.
pub fn component_dependencies(
    component: &str,
    callees: &[String],
    is_registered: impl Fn(&str) -> bool,
) -> Vec<String> {
    let mut seen = FxHashSet::default();
    callees
        .iter()
        .filter(|name| name.chars().next().is_some_and(char::is_uppercase))
        .filter(|name| name.as_str() != component)
        .filter(|name| is_registered(name))
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

/// Find cycles with a depth-first traversal.
///
/// One cycle is reported per back edge found, as the path from the first
/// occurrence of the repeated node to the node itself, so every cycle starts
/// and ends with the same name. This is not an enumeration of all simple
/// cycles: overlapping cycles sharing a back edge are reported once.
///
/// The traversal is iterative, so deep graphs cannot overflow the stack.
pub fn find_cycles(graph: &DependencyGraph) -> Vec<Vec<String>> {
    let mut cycles = Vec::new();
    let mut visited: FxHashSet<&str> = FxHashSet::default();

    for root in graph.keys() {
        let root = root.as_str();
        if !visited.insert(root) {
            continue;
        }

        // (node, index of the next edge to follow)
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        let mut on_stack: FxHashSet<&str> = FxHashSet::default();
        on_stack.insert(root);

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let edges = graph.get(node).map(Vec::as_slice).unwrap_or_default();

            if frame.1 >= edges.len() {
                on_stack.remove(node);
                stack.pop();
                continue;
            }

            let dep = edges[frame.1].as_str();
            frame.1 += 1;

            if on_stack.contains(dep) {
                if let Some(start) = stack.iter().position(|(name, _)| *name == dep) {
                    let mut cycle: Vec<String> = stack[start..]
                        .iter()
                        .map(|(name, _)| (*name).to_string())
                        .collect();
                    cycle.push(dep.to_string());
                    cycles.push(cycle);
                }
            } else if visited.insert(dep) {
                on_stack.insert(dep);
                stack.push((dep, 0));
            }
        }
    }

    cycles
}
