// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Build-time validation and planning.
//!
//! The catalog is declarative; nothing about it is checked while binder
//! chains run. This module materializes it into a `GraphPlan` just before
//! execution: arity and label checks, gate resolution, producer uniqueness,
//! cycle rejection, edge construction, and the flush fan-in accounting the
//! runtime needs. Every violation is pushed into the shared error list; the
//! plan is only produced when that list stays empty.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::errors::RegistrationError;
use crate::graph::catalog::{Concurrency, NodeCatalog};
use crate::graph::dependency_graph::DependencyGraph;
use crate::graph::kernels::{
    FoldCall, FoldInit, ObserverCall, PredicateCall, SinkCall, TransformCall, UnfoldCall,
};
use crate::graph::labels::{ProductLabel, QualifiedName};

/// How one kernel argument is obtained when the node fires.
#[derive(Clone, Debug)]
pub(crate) enum InputBinding {
    /// Delivered through the named join port.
    Port(usize),
    /// Resolved from the fired store's parent chain at kernel time (used
    /// for inputs level-qualified above the node's firing scope).
    Ancestry(ProductLabel),
}

/// One join port of a node.
#[derive(Clone, Debug)]
pub(crate) struct PortPlan {
    pub label: String,
    pub level: Option<String>,
}

/// The kind-specific half of a planned node.
pub(crate) enum KernelPlan {
    Transform {
        call: TransformCall,
        outputs: Vec<String>,
    },
    Predicate {
        call: PredicateCall,
        label: String,
    },
    Observer {
        call: ObserverCall,
    },
    Fold {
        call: FoldCall,
        init: FoldInit,
        output: String,
        partition: String,
    },
    Unfold {
        expand: UnfoldCall,
        into_label: String,
        family: String,
    },
    Sink {
        call: SinkCall,
    },
}

impl KernelPlan {
    pub fn kind_name(&self) -> &'static str {
        match self {
            KernelPlan::Transform { .. } => "transform",
            KernelPlan::Predicate { .. } => "predicate",
            KernelPlan::Observer { .. } => "observer",
            KernelPlan::Fold { .. } => "fold",
            KernelPlan::Unfold { .. } => "unfold",
            KernelPlan::Sink { .. } => "output",
        }
    }

    fn is_producer(&self) -> bool {
        matches!(
            self,
            KernelPlan::Transform { .. } | KernelPlan::Fold { .. } | KernelPlan::Unfold { .. }
        )
    }
}

/// A fully planned node: ports, bindings, routes, and flush accounting.
pub(crate) struct NodePlan {
    pub name: QualifiedName,
    pub concurrency: Concurrency,
    pub kernel: KernelPlan,
    /// Data ports first, then one gate port per resolved predicate.
    pub ports: Vec<PortPlan>,
    pub gate_ports: usize,
    pub bindings: Vec<InputBinding>,
    /// label → (node index, port index) of each consumer.
    pub out_routes: BTreeMap<String, Vec<(usize, usize)>>,
    /// Sink nodes that observe this node's emissions.
    pub sink_targets: Vec<usize>,
    /// Distinct downstream nodes every processed flush is forwarded to.
    pub flush_targets: Vec<usize>,
    /// origin key → number of copies of each token that must arrive before
    /// it is processed.
    pub flush_expect: HashMap<String, usize>,
}

/// One subscription of a node port to source-emitted labels.
pub(crate) struct SourcePort {
    pub label: String,
    pub level: Option<String>,
    pub node: usize,
    pub port: usize,
}

/// The validated, materialization-ready graph.
pub(crate) struct GraphPlan {
    pub nodes: Vec<NodePlan>,
    pub source_ports: Vec<SourcePort>,
    /// Distinct nodes that receive source flush tokens directly.
    pub source_flush_targets: Vec<usize>,
}

/// Validates the catalog and plans the runtime graph. Violations accumulate
/// into `errors`; `None` is returned if any were present (pre-existing ones
/// included).
pub(crate) fn plan(
    catalog: NodeCatalog,
    errors: &mut Vec<RegistrationError>,
) -> Option<GraphPlan> {
    let planner = Planner::new(catalog, errors);
    planner.run()
}

struct Planner<'e> {
    catalog: NodeCatalog,
    errors: &'e mut Vec<RegistrationError>,
}

struct DraftNode {
    name: QualifiedName,
    concurrency: Concurrency,
    kernel: KernelPlan,
    inputs: Vec<ProductLabel>,
    level: Option<String>,
    gates: Vec<String>,
    arity: usize,
}

impl<'e> Planner<'e> {
    fn new(catalog: NodeCatalog, errors: &'e mut Vec<RegistrationError>) -> Self {
        Planner { catalog, errors }
    }

    fn run(mut self) -> Option<GraphPlan> {
        let drafts = self.drain_catalog();
        self.check_labels(&drafts);
        self.check_arities(&drafts);
        let producers = self.build_producers(&drafts);
        let gates = self.resolve_gates(&drafts);

        // Assemble ports, bindings, and data edges.
        let mut nodes = Vec::with_capacity(drafts.len());
        let index_of: HashMap<QualifiedName, usize> = drafts
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        let sink_indices: Vec<usize> = drafts
            .iter()
            .enumerate()
            .filter_map(|(i, d)| matches!(d.kernel, KernelPlan::Sink { .. }).then_some(i))
            .collect();

        for draft in &drafts {
            let (ports, bindings) = Self::plan_ports(draft, gates.get(&draft.name));
            nodes.push(NodePlan {
                name: draft.name.clone(),
                concurrency: draft.concurrency,
                kernel: Self::placeholder(),
                ports,
                gate_ports: gates.get(&draft.name).map(|g| g.len()).unwrap_or(0),
                bindings,
                out_routes: BTreeMap::new(),
                sink_targets: Vec::new(),
                flush_targets: Vec::new(),
                flush_expect: HashMap::new(),
            });
        }
        // Move the kernels in (placeholder dance keeps the borrow checker
        // out of the two-pass construction above).
        for (node, draft) in nodes.iter_mut().zip(drafts.into_iter()) {
            node.kernel = draft.kernel;
        }

        // Wire consumers to producers; anything without a producer is a
        // source subscription.
        let mut source_ports = Vec::new();
        let mut edges: HashSet<(usize, usize)> = HashSet::new();
        for consumer in 0..nodes.len() {
            for (port, spec) in nodes[consumer].ports.clone().iter().enumerate() {
                match producers.get(&spec.label) {
                    Some(producer_name) => {
                        let producer = index_of[producer_name];
                        edges.insert((producer, consumer));
                        nodes[producer]
                            .out_routes
                            .entry(spec.label.clone())
                            .or_default()
                            .push((consumer, port));
                    }
                    None => source_ports.push(SourcePort {
                        label: spec.label.clone(),
                        level: spec.level.clone(),
                        node: consumer,
                        port,
                    }),
                }
            }
        }

        // Every data-producing node also feeds the output sinks.
        for producer in 0..nodes.len() {
            if nodes[producer].kernel.is_producer() {
                for &sink in &sink_indices {
                    nodes[producer].sink_targets.push(sink);
                    edges.insert((producer, sink));
                }
            }
        }

        self.reject_cycles(&nodes, &edges);

        // Flush wiring: tokens travel every data edge exactly once per
        // forwarding node, so a node processes a token once it has arrived
        // from every upstream path the token's origin can reach.
        let mut source_fed: Vec<usize> = source_ports.iter().map(|p| p.node).collect();
        source_fed.sort_unstable();
        source_fed.dedup();

        for producer in 0..nodes.len() {
            let mut targets: Vec<usize> = nodes[producer]
                .out_routes
                .values()
                .flat_map(|consumers| consumers.iter().map(|&(node, _)| node))
                .chain(nodes[producer].sink_targets.iter().copied())
                .collect();
            targets.sort_unstable();
            targets.dedup();
            nodes[producer].flush_targets = targets;
        }

        let dependency_graph = Self::dependency_graph(&nodes, &edges);
        let upstream = dependency_graph.build_reverse_dependencies();

        let mut origins: Vec<(String, Vec<String>, bool)> = Vec::new();
        origins.push((
            "source".to_string(),
            source_fed.iter().map(|&i| nodes[i].name.full()).collect(),
            true,
        ));
        for node in &nodes {
            if let KernelPlan::Unfold { .. } = node.kernel {
                origins.push((node.name.full(), vec![node.name.full()], false));
            }
        }

        for (origin_key, roots, is_source) in &origins {
            let reachable = dependency_graph.reachable_from(roots.iter());
            for (index, node) in nodes.iter_mut().enumerate() {
                let full = node.name.full();
                let mut expect = upstream
                    .get(&full)
                    .map(|ups| ups.iter().filter(|u| reachable.contains(*u)).count())
                    .unwrap_or(0);
                if *is_source && source_fed.contains(&index) {
                    expect += 1;
                }
                if expect > 0 {
                    node.flush_expect.insert(origin_key.clone(), expect);
                }
            }
        }

        if !self.errors.is_empty() {
            return None;
        }

        Some(GraphPlan {
            nodes,
            source_ports,
            source_flush_targets: source_fed,
        })
    }

    /// A throwaway kernel used while the node list is being shaped.
    fn placeholder() -> KernelPlan {
        KernelPlan::Observer {
            call: std::sync::Arc::new(|_| Ok(())),
        }
    }

    fn drain_catalog(&mut self) -> Vec<DraftNode> {
        let mut drafts = Vec::with_capacity(self.catalog.len());
        let catalog = std::mem::take(&mut self.catalog);

        for (name, spec) in catalog.transforms {
            drafts.push(DraftNode {
                name,
                concurrency: spec.concurrency,
                kernel: KernelPlan::Transform {
                    call: spec.call,
                    outputs: spec.outputs,
                },
                inputs: spec.inputs,
                level: spec.level,
                gates: spec.gates,
                arity: spec.arity,
            });
        }
        for (name, spec) in catalog.predicates {
            let label = name.full();
            drafts.push(DraftNode {
                name,
                concurrency: spec.concurrency,
                kernel: KernelPlan::Predicate {
                    call: spec.call,
                    label,
                },
                inputs: spec.inputs,
                level: spec.level,
                gates: spec.gates,
                arity: spec.arity,
            });
        }
        for (name, spec) in catalog.observers {
            drafts.push(DraftNode {
                name,
                concurrency: spec.concurrency,
                kernel: KernelPlan::Observer { call: spec.call },
                inputs: spec.inputs,
                level: spec.level,
                gates: spec.gates,
                arity: spec.arity,
            });
        }
        for (name, spec) in catalog.folds {
            let init = match spec.init {
                Some(init) => init,
                None => {
                    self.errors.push(RegistrationError::MissingInitializer {
                        node: name.full(),
                    });
                    continue;
                }
            };
            if spec.partition.is_empty() {
                self.errors
                    .push(RegistrationError::EmptyLabel { node: name.full() });
            }
            drafts.push(DraftNode {
                name,
                concurrency: spec.concurrency,
                kernel: KernelPlan::Fold {
                    call: spec.call,
                    init,
                    output: spec.output,
                    partition: spec.partition,
                },
                inputs: spec.inputs,
                level: None,
                gates: spec.gates,
                arity: spec.arity,
            });
        }
        for (name, spec) in catalog.unfolds {
            if spec.family.is_empty() {
                self.errors
                    .push(RegistrationError::EmptyFamily { node: name.full() });
            }
            drafts.push(DraftNode {
                name,
                concurrency: spec.concurrency,
                kernel: KernelPlan::Unfold {
                    expand: spec.expand,
                    into_label: spec.into_label,
                    family: spec.family,
                },
                inputs: vec![spec.key],
                level: None,
                gates: Vec::new(),
                arity: 1,
            });
        }
        for (name, spec) in catalog.sinks {
            drafts.push(DraftNode {
                name,
                concurrency: spec.concurrency,
                kernel: KernelPlan::Sink { call: spec.call },
                inputs: Vec::new(),
                level: None,
                gates: Vec::new(),
                arity: 0,
            });
        }
        drafts
    }

    fn check_labels(&mut self, drafts: &[DraftNode]) {
        for draft in drafts {
            let mut names = draft.inputs.iter().map(|l| l.name.clone()).collect::<Vec<_>>();
            match &draft.kernel {
                KernelPlan::Transform { outputs, .. } => names.extend(outputs.iter().cloned()),
                KernelPlan::Fold { output, .. } => names.push(output.clone()),
                KernelPlan::Unfold { into_label, .. } => names.push(into_label.clone()),
                _ => {}
            }
            if names.iter().any(|n| n.is_empty()) {
                self.errors.push(RegistrationError::EmptyLabel {
                    node: draft.name.full(),
                });
            }
        }
    }

    fn check_arities(&mut self, drafts: &[DraftNode]) {
        for draft in drafts {
            if matches!(draft.kernel, KernelPlan::Sink { .. }) {
                continue;
            }
            if draft.inputs.len() != draft.arity {
                self.errors.push(RegistrationError::ArityMismatch {
                    node: draft.name.full(),
                    expected: draft.arity,
                    actual: draft.inputs.len(),
                });
            }
        }
    }

    fn build_producers(&mut self, drafts: &[DraftNode]) -> HashMap<String, QualifiedName> {
        let mut producers: HashMap<String, QualifiedName> = HashMap::new();
        for draft in drafts {
            let outputs: Vec<String> = match &draft.kernel {
                KernelPlan::Transform { outputs, .. } => outputs.clone(),
                KernelPlan::Predicate { label, .. } => vec![label.clone()],
                KernelPlan::Fold { output, .. } => vec![output.clone()],
                KernelPlan::Unfold { into_label, .. } => vec![into_label.clone()],
                KernelPlan::Observer { .. } | KernelPlan::Sink { .. } => vec![],
            };
            for label in outputs {
                if label.is_empty() {
                    continue;
                }
                if let Some(first) = producers.get(&label) {
                    self.errors.push(RegistrationError::DuplicateProducer {
                        label,
                        first: first.full(),
                        second: draft.name.full(),
                    });
                } else {
                    producers.insert(label, draft.name.clone());
                }
            }
        }
        producers
    }

    /// Resolves `when(...)` names to predicate labels: an exact full-name
    /// match first, then scoped by the gated node's own module.
    fn resolve_gates(&mut self, drafts: &[DraftNode]) -> HashMap<QualifiedName, Vec<String>> {
        let declared: HashSet<String> = drafts
            .iter()
            .filter_map(|d| match &d.kernel {
                KernelPlan::Predicate { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect();

        let mut resolved_by_node = HashMap::new();
        for draft in drafts {
            if draft.gates.is_empty() {
                continue;
            }
            let mut resolved = Vec::with_capacity(draft.gates.len());
            for gate in &draft.gates {
                if declared.contains(gate) {
                    resolved.push(gate.clone());
                    continue;
                }
                let scoped = draft
                    .name
                    .module()
                    .map(|module| format!("{}:{}", module, gate));
                match scoped.filter(|s| declared.contains(s)) {
                    Some(scoped) => resolved.push(scoped),
                    None => self.errors.push(RegistrationError::UnknownPredicate {
                        node: draft.name.full(),
                        predicate: gate.clone(),
                    }),
                }
            }
            resolved_by_node.insert(draft.name.clone(), resolved);
        }
        resolved_by_node
    }

    fn plan_ports(
        draft: &DraftNode,
        gates: Option<&Vec<String>>,
    ) -> (Vec<PortPlan>, Vec<InputBinding>) {
        let mut ports = Vec::new();
        let mut bindings = Vec::new();
        for input in &draft.inputs {
            let out_of_scope = match (&input.level, &draft.level) {
                (Some(input_level), Some(node_level)) => input_level != node_level,
                _ => false,
            };
            if out_of_scope {
                bindings.push(InputBinding::Ancestry(input.clone()));
            } else {
                bindings.push(InputBinding::Port(ports.len()));
                ports.push(PortPlan {
                    label: input.name.clone(),
                    level: input.level.clone().or_else(|| draft.level.clone()),
                });
            }
        }
        if let Some(gates) = gates {
            for gate in gates {
                ports.push(PortPlan {
                    label: gate.clone(),
                    level: None,
                });
            }
        }
        (ports, bindings)
    }

    fn dependency_graph(nodes: &[NodePlan], edges: &HashSet<(usize, usize)>) -> DependencyGraph {
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for node in nodes {
            adjacency.insert(node.name.full(), Vec::new());
        }
        for &(from, to) in edges {
            adjacency
                .get_mut(&nodes[from].name.full())
                .map(|deps| deps.push(nodes[to].name.full()));
        }
        DependencyGraph::from(adjacency)
    }

    fn reject_cycles(&mut self, nodes: &[NodePlan], edges: &HashSet<(usize, usize)>) {
        let graph = Self::dependency_graph(nodes, edges);
        if let Some(cycle) = graph.find_cycle() {
            self.errors.push(RegistrationError::CyclicGraph { cycle });
        }
    }
}
