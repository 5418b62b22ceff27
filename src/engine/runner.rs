// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The graph runner: materializes the plan, drives the source to
//! exhaustion, and waits for quiescence.
//!
//! The runner is the only component that talks to the source driver. It
//! tracks the stack of open stores so it can mint a flush token the moment
//! the source closes a level (by yielding a non-descendant, or by ending),
//! and it owns the ticket registry that keeps joins aligned across
//! producers. Quiescence is structural: when the runner drops its entry
//! senders after the last flush, node inboxes close in topological order
//! and every node task returns once drained.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;

use crate::engine::multiplexer::{PortAddress, RouteTable};
use crate::engine::node::{
    run_node, Delivery, FatalFlag, FoldState, NodeCounters, NodeKernel, NodeShared,
};
use crate::errors::{FrameworkError, RuntimeError};
use crate::graph::builder::FlowGraph;
use crate::graph::dot;
use crate::graph::validation::{self, GraphPlan, KernelPlan};
use crate::model::{FlushOrigin, FlushToken, Message, ProductStore, StoreCache, TicketRegistry};
use crate::observability::messages::engine::{
    ExecutionCompleted, ExecutionFailed, ExecutionStarted,
};
use crate::observability::messages::source::SourceExhausted;
use crate::observability::messages::StructuredLog;
use crate::source::{SourceDriver, SourceSpec};

/// What `execute()` reports at quiescence.
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    executions: HashMap<String, usize>,
    source_yields: usize,
    flushes_emitted: usize,
    duration: std::time::Duration,
}

impl ExecutionSummary {
    /// Kernel invocation count for the named node (full qualified name);
    /// zero for unknown nodes.
    pub fn execution_count(&self, node: &str) -> usize {
        self.executions.get(node).copied().unwrap_or(0)
    }

    /// All per-node execution counts.
    pub fn executions(&self) -> &HashMap<String, usize> {
        &self.executions
    }

    /// Stores the source yielded.
    pub fn source_yields(&self) -> usize {
        self.source_yields
    }

    /// Flush tokens the runner minted (the source's; unfold flushes are not
    /// counted here).
    pub fn flushes_emitted(&self) -> usize {
        self.flushes_emitted
    }

    pub fn duration(&self) -> std::time::Duration {
        self.duration
    }
}

pub(crate) async fn execute(graph: FlowGraph) -> Result<ExecutionSummary, FrameworkError> {
    let FlowGraph {
        source,
        catalog,
        mut errors,
        max_parallelism,
        dot_path,
    } = graph;

    let Some(plan) = validation::plan(catalog, &mut errors) else {
        return Err(FrameworkError::Registration(errors));
    };

    if let Some(path) = &dot_path {
        dot::write_dot(&plan, path).map_err(FrameworkError::Runtime)?;
    }
    if let Some(workers) = max_parallelism {
        tracing::debug!(workers, "graph prefers a bounded worker pool");
    }

    ExecutionStarted {
        node_count: plan.nodes.len(),
    }
    .log();

    let started = Instant::now();
    let fatal = FatalFlag::new();
    let tickets = Arc::new(TicketRegistry::new());
    let launched = launch(plan, fatal.clone(), tickets.clone());
    let node_count = launched.handles.len();
    let summary = drive(source, launched, fatal.clone(), tickets, started).await;

    match summary {
        Ok(summary) => {
            ExecutionCompleted {
                node_count,
                stores: summary.source_yields,
                duration: summary.duration,
            }
            .log();
            Ok(summary)
        }
        Err(error) => {
            ExecutionFailed { error: &error }.log();
            Err(error)
        }
    }
}

struct Launched {
    entry_routes: RouteTable,
    entry_flush: Vec<UnboundedSender<Delivery>>,
    handles: Vec<(String, JoinHandle<()>)>,
    counters: Vec<(String, Arc<NodeCounters>)>,
}

/// Builds channels and spawns one cooperative task per node.
fn launch(plan: GraphPlan, fatal: FatalFlag, tickets: Arc<TicketRegistry>) -> Launched {
    let names: Vec<String> = plan.nodes.iter().map(|n| n.name.full()).collect();
    let port_levels: Vec<Vec<Option<String>>> = plan
        .nodes
        .iter()
        .map(|n| n.ports.iter().map(|p| p.level.clone()).collect())
        .collect();
    let mut senders = Vec::with_capacity(plan.nodes.len());
    let mut receivers = Vec::with_capacity(plan.nodes.len());
    for _ in &plan.nodes {
        let (tx, rx) = mpsc::unbounded_channel();
        senders.push(tx);
        receivers.push(Some(rx));
    }

    let mut handles = Vec::with_capacity(plan.nodes.len());
    let mut counters = Vec::with_capacity(plan.nodes.len());

    for (index, node_plan) in plan.nodes.into_iter().enumerate() {
        let mut routes = RouteTable::new();
        for (label, consumers) in &node_plan.out_routes {
            for &(consumer, port) in consumers {
                routes.subscribe(
                    label,
                    PortAddress {
                        node_name: names[consumer].clone(),
                        port,
                        level: port_levels[consumer][port].clone(),
                        sender: senders[consumer].clone(),
                    },
                );
            }
        }
        let sink_targets = node_plan
            .sink_targets
            .iter()
            .map(|&sink| senders[sink].clone())
            .collect();
        let flush_targets = node_plan
            .flush_targets
            .iter()
            .map(|&target| senders[target].clone())
            .collect();

        let kernel = match node_plan.kernel {
            KernelPlan::Transform { call, outputs } => NodeKernel::Transform { call, outputs },
            KernelPlan::Predicate { call, label } => NodeKernel::Predicate { call, label },
            KernelPlan::Observer { call } => NodeKernel::Observer { call },
            KernelPlan::Fold {
                call,
                init,
                output,
                partition,
            } => NodeKernel::Fold(FoldState::new(call, init, output, partition)),
            KernelPlan::Unfold {
                expand,
                into_label,
                family,
            } => NodeKernel::Unfold {
                expand,
                into_label,
                family,
            },
            KernelPlan::Sink { call } => NodeKernel::Sink { call },
        };

        let data_ports = node_plan.ports.len() - node_plan.gate_ports;
        let gate_ports = node_plan
            .ports
            .iter()
            .enumerate()
            .skip(data_ports)
            .map(|(i, port)| (i, port.label.clone()))
            .collect();

        let node_counters = NodeCounters::new();
        counters.push((names[index].clone(), node_counters.clone()));

        let shared = Arc::new(NodeShared {
            name: names[index].clone(),
            kernel,
            concurrency: node_plan.concurrency,
            port_labels: node_plan.ports.iter().map(|p| p.label.clone()).collect(),
            gate_ports,
            bindings: node_plan.bindings,
            routes,
            sink_targets,
            flush_targets,
            flush_expect: node_plan.flush_expect,
            counters: node_counters,
            fatal: fatal.clone(),
            tickets: tickets.clone(),
        });

        let inbox = match receivers[index].take() {
            Some(rx) => rx,
            None => continue,
        };
        handles.push((names[index].clone(), tokio::spawn(run_node(shared, inbox))));
    }

    let mut entry_routes = RouteTable::new();
    for port in &plan.source_ports {
        entry_routes.subscribe(
            &port.label,
            PortAddress {
                node_name: names[port.node].clone(),
                port: port.port,
                level: port.level.clone(),
                sender: senders[port.node].clone(),
            },
        );
    }
    let entry_flush = plan
        .source_flush_targets
        .iter()
        .map(|&target| senders[target].clone())
        .collect();

    Launched {
        entry_routes,
        entry_flush,
        handles,
        counters,
    }
}

/// One store the source has opened and not yet closed.
struct OpenLevel {
    store: Arc<ProductStore>,
    child_counts: BTreeMap<String, usize>,
}

async fn drive(
    source: SourceSpec,
    launched: Launched,
    fatal: FatalFlag,
    tickets: Arc<TicketRegistry>,
    started: Instant,
) -> Result<ExecutionSummary, FrameworkError> {
    let Launched {
        entry_routes,
        entry_flush,
        handles,
        counters,
    } = launched;

    let mut driver = SourceDriver::new(source);
    let cache = StoreCache::new();
    let mut stack: Vec<OpenLevel> = Vec::new();
    let mut yields = 0usize;
    let mut flushes = 0usize;

    while let Some(store) = driver.next().await {
        if fatal.is_raised() {
            break;
        }
        let accepted = accept_store(
            &entry_routes,
            &entry_flush,
            &tickets,
            &cache,
            &mut stack,
            &mut flushes,
            store,
        );
        match accepted {
            Ok(()) => yields += 1,
            Err(error) => {
                fatal.raise(error);
                break;
            }
        }
    }
    if let Err(error) = driver.finish().await {
        if !fatal.is_raised() {
            fatal.raise(error);
        }
    }

    // Close every still-open level, deepest first; the job flush goes out
    // last. After a fatal error the graph is draining, not completing, so
    // no further fences are minted.
    while let Some(open) = stack.pop() {
        if !fatal.is_raised() {
            emit_source_flush(&entry_flush, &tickets, open, &mut flushes);
        }
    }
    SourceExhausted {
        stores: yields,
        flushes,
    }
    .log();

    drop(entry_routes);
    drop(entry_flush);

    for (name, handle) in handles {
        if let Err(join_error) = handle.await {
            fatal.raise(RuntimeError::Internal {
                detail: format!("node loop for '{}' panicked: {}", name, join_error),
            });
        }
    }
    cache.prune();

    if let Some(error) = fatal.take() {
        return Err(FrameworkError::Runtime(error));
    }

    let executions = counters
        .into_iter()
        .map(|(name, counters)| (name, counters.executions.load(Ordering::Relaxed)))
        .collect();
    Ok(ExecutionSummary {
        executions,
        source_yields: yields,
        flushes_emitted: flushes,
        duration: started.elapsed(),
    })
}

/// Registers a yielded store, closes levels it leaves behind, and routes
/// its products to the entry ports.
fn accept_store(
    entry_routes: &RouteTable,
    entry_flush: &[UnboundedSender<Delivery>],
    tickets: &Arc<TicketRegistry>,
    cache: &StoreCache,
    stack: &mut Vec<OpenLevel>,
    flushes: &mut usize,
    store: Arc<ProductStore>,
) -> Result<(), RuntimeError> {
    cache.register(&store)?;

    match store.parent() {
        None => {
            // A new root closes everything before it.
            while let Some(open) = stack.pop() {
                emit_source_flush(entry_flush, tickets, open, flushes);
            }
        }
        Some(parent) => {
            // The parent must still be open. Checking before anything is
            // popped keeps an orphan from closing levels the source never
            // actually left: rejecting it must not mint any flush token.
            let parent_depth = stack
                .iter()
                .rposition(|open| open.store.id() == parent.id())
                .ok_or_else(|| RuntimeError::OrphanStore {
                    id: store.id().to_string(),
                })?;
            while stack.len() > parent_depth + 1 {
                let open = match stack.pop() {
                    Some(open) => open,
                    None => break,
                };
                emit_source_flush(entry_flush, tickets, open, flushes);
            }
            if let Some(top) = stack.last_mut() {
                *top.child_counts
                    .entry(store.level_name().to_string())
                    .or_insert(0) += 1;
            }
        }
    }

    stack.push(OpenLevel {
        store: store.clone(),
        child_counts: BTreeMap::new(),
    });

    let ticket = tickets.ticket_for(store.id());
    let message = Message::new(store.clone(), ticket);
    let labels = store.labels();
    entry_routes.route_all(labels.iter().map(String::as_str), &message);
    Ok(())
}

fn emit_source_flush(
    entry_flush: &[UnboundedSender<Delivery>],
    tickets: &Arc<TicketRegistry>,
    open: OpenLevel,
    flushes: &mut usize,
) {
    let token = Arc::new(FlushToken {
        store: open.store,
        child_counts: open.child_counts,
        sequence: tickets.next_sequence(),
        origin: FlushOrigin::Source,
    });
    for target in entry_flush {
        let _ = target.send(Delivery::Flush(token.clone()));
    }
    *flushes += 1;
}
