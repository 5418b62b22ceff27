use std::collections::HashMap;

/// The node-to-node wiring of a materialized graph as a forward adjacency
/// list: each qualified name maps to the names that consume its output.
///
/// The forward representation (A → [B, C]) is what the builder derives from
/// the label producer/consumer relationships, and it is the convenient
/// shape for the analyses validation needs:
///
/// - **Cycle detection** (`find_cycle`): the catalog must form a DAG by
///   construction; feeding a node's output back to an upstream input is
///   rejected with the offending path.
/// - **Reverse dependencies** (`build_reverse_dependencies`): which nodes
///   feed a given node, used for flush fan-in accounting.
/// - **Reachability** (`reachable_from`): which nodes can observe a flush
///   token minted at a given origin.
/// - **Topological sorting** (`topological_sort`): deterministic node
///   ordering for diagnostics and the Graphviz export.
#[derive(Debug, Clone)]
pub struct DependencyGraph(pub HashMap<String, Vec<String>>);

impl DependencyGraph {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Adds (or replaces) the dependents of `node`.
    pub fn add_dependency(&mut self, node: String, dependents: Vec<String>) {
        self.0.insert(node, dependents);
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Count incoming edges for each node.
    pub fn build_dependency_counts(&self) -> HashMap<String, usize> {
        let mut dependency_counts = HashMap::new();
        for node in self.0.keys() {
            dependency_counts.insert(node.clone(), 0);
        }
        for dependents in self.0.values() {
            for dependent in dependents {
                *dependency_counts.entry(dependent.clone()).or_insert(0) += 1;
            }
        }
        dependency_counts
    }

    /// Reverse mapping: node → the nodes it depends on.
    pub fn build_reverse_dependencies(&self) -> HashMap<String, Vec<String>> {
        let mut reverse_deps: HashMap<String, Vec<String>> = HashMap::new();
        for node in self.0.keys() {
            reverse_deps.insert(node.clone(), vec![]);
        }
        for (node, dependents) in &self.0 {
            for dependent in dependents {
                reverse_deps
                    .entry(dependent.clone())
                    .or_default()
                    .push(node.clone());
            }
        }
        reverse_deps
    }

    /// Every node reachable by following forward edges from `origins`,
    /// including the origins themselves.
    pub fn reachable_from<'a>(
        &self,
        origins: impl IntoIterator<Item = &'a String>,
    ) -> std::collections::HashSet<String> {
        let mut reached = std::collections::HashSet::new();
        let mut stack: Vec<String> = origins.into_iter().cloned().collect();
        while let Some(node) = stack.pop() {
            if !reached.insert(node.clone()) {
                continue;
            }
            if let Some(dependents) = self.0.get(&node) {
                for dependent in dependents {
                    if !reached.contains(dependent) {
                        stack.push(dependent.clone());
                    }
                }
            }
        }
        reached
    }

    /// Kahn's algorithm over pre-computed dependency counts. Returns `None`
    /// when the graph has cycles.
    pub fn topological_sort_with_counts(
        &self,
        mut dependency_counts: HashMap<String, usize>,
    ) -> Option<Vec<String>> {
        let mut result = Vec::new();
        let mut queue: Vec<String> = dependency_counts
            .iter()
            .filter_map(|(node, &count)| (count == 0).then(|| node.clone()))
            .collect();
        queue.sort();

        while let Some(node) = queue.pop() {
            result.push(node.clone());
            if let Some(dependents) = self.0.get(&node) {
                for dependent in dependents {
                    if let Some(count) = dependency_counts.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            queue.push(dependent.clone());
                        }
                    }
                }
            }
        }

        if result.len() == self.0.len() {
            Some(result)
        } else {
            None
        }
    }

    /// Topological order of all nodes, or `None` when the graph has cycles.
    pub fn topological_sort(&self) -> Option<Vec<String>> {
        self.topological_sort_with_counts(self.build_dependency_counts())
    }

    /// Finds one cycle and returns its path (first node repeated at the
    /// end), or `None` when the graph is acyclic.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        const UNVISITED: u8 = 0;
        const VISITING: u8 = 1;
        const VISITED: u8 = 2;

        fn dfs<'a>(
            graph: &'a HashMap<String, Vec<String>>,
            node: &'a str,
            state: &mut HashMap<&'a str, u8>,
            path: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            match state.get(node).copied().unwrap_or(UNVISITED) {
                VISITING => {
                    // Back edge: the cycle is the suffix of the path from
                    // the first occurrence of `node`.
                    let start = path.iter().position(|n| n == node).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].to_vec();
                    cycle.push(node.to_string());
                    return Some(cycle);
                }
                VISITED => return None,
                _ => {}
            }

            state.insert(node, VISITING);
            path.push(node.to_string());
            if let Some(neighbors) = graph.get(node) {
                for dependent in neighbors {
                    if let Some(cycle) = dfs(graph, dependent.as_str(), state, path) {
                        return Some(cycle);
                    }
                }
            }
            path.pop();
            state.insert(node, VISITED);
            None
        }

        let mut state: HashMap<&str, u8> = HashMap::new();
        let mut keys: Vec<&String> = self.0.keys().collect();
        keys.sort();
        for node in keys {
            if state.get(node.as_str()).copied().unwrap_or(UNVISITED) == UNVISITED {
                let mut path = Vec::new();
                if let Some(cycle) = dfs(&self.0, node.as_str(), &mut state, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl From<HashMap<String, Vec<String>>> for DependencyGraph {
    fn from(graph: HashMap<String, Vec<String>>) -> Self {
        Self(graph)
    }
}
