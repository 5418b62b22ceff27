// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The runtime node: one cooperative task per declared node.
//!
//! Each node services a FIFO inbox of deliveries. Data messages go through
//! the per-node join; a completed coincidence is checked against the node's
//! predicate gates and then dispatched as a kernel task, capped by the
//! node's declared concurrency. Flush tokens take the control path: once a
//! token has arrived on every upstream path its origin can reach, the node
//! drains its in-flight kernels (the fence that keeps a flush from
//! overtaking data), lets the kind-specific handler act on it, and forwards
//! it downstream exactly once.
//!
//! All shared state uses the Arc-plus-lock pattern: the node's own loop is
//! the only consumer of its inbox, kernel tasks run on arbitrary workers,
//! and a single cancellation token carries the fatal flag to every
//! dispatch site.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::engine::join::Join;
use crate::engine::multiplexer::RouteTable;
use crate::errors::RuntimeError;
use crate::graph::catalog::Concurrency;
use crate::graph::kernels::{
    FoldCall, FoldInit, KernelError, ObserverCall, PredicateCall, SinkCall, TransformCall,
    UnfoldCall,
};
use crate::graph::validation::InputBinding;
use crate::model::{
    ErasedProduct, FlushOrigin, FlushToken, LevelId, Message, ProductStore, TicketRegistry,
};
use crate::observability::messages::engine::NodeDrained;
use crate::observability::messages::StructuredLog;

/// What node inboxes carry.
pub(crate) enum Delivery {
    Data { message: Message, port: usize },
    Flush(Arc<FlushToken>),
}

/// The single atomic fatal flag plus the first error observed.
///
/// Raising it cancels every subsequent dispatch; outstanding work drains
/// and `execute()` surfaces the stored error verbatim.
#[derive(Clone)]
pub(crate) struct FatalFlag {
    token: CancellationToken,
    first: Arc<Mutex<Option<RuntimeError>>>,
}

impl FatalFlag {
    pub fn new() -> Self {
        FatalFlag {
            token: CancellationToken::new(),
            first: Arc::new(Mutex::new(None)),
        }
    }

    pub fn raise(&self, error: RuntimeError) {
        let mut first = self
            .first
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if first.is_none() {
            tracing::error!(error = %error, "fatal error raised");
            *first = Some(error);
        }
        drop(first);
        self.token.cancel();
    }

    pub fn is_raised(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn take(&self) -> Option<RuntimeError> {
        self.first
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

pub(crate) struct NodeCounters {
    pub executions: AtomicUsize,
}

impl NodeCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(NodeCounters {
            executions: AtomicUsize::new(0),
        })
    }
}

/// Kind-specific runtime state.
pub(crate) enum NodeKernel {
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
    Fold(FoldState),
    Unfold {
        expand: UnfoldCall,
        into_label: String,
        family: String,
    },
    Sink {
        call: SinkCall,
    },
}

/// Per-partition fold bookkeeping.
pub(crate) struct FoldState {
    pub call: FoldCall,
    pub init: FoldInit,
    pub output: String,
    pub partition: String,
    partitions: Mutex<HashMap<LevelId, Arc<PartitionCell>>>,
}

impl FoldState {
    pub fn new(call: FoldCall, init: FoldInit, output: String, partition: String) -> Self {
        FoldState {
            call,
            init,
            output,
            partition,
            partitions: Mutex::new(HashMap::new()),
        }
    }

    fn cell_for(&self, id: &LevelId) -> Arc<PartitionCell> {
        let mut partitions = self
            .partitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        partitions
            .entry(id.clone())
            .or_insert_with(|| {
                Arc::new(PartitionCell {
                    state: Mutex::new(PartitionState::default()),
                })
            })
            .clone()
    }
}

struct PartitionCell {
    state: Mutex<PartitionState>,
}

#[derive(Default)]
struct PartitionState {
    accumulator: Option<Box<dyn Any + Send + Sync>>,
    store: Option<Arc<ProductStore>>,
    /// Accepted inputs by the level name of the store they arrived on.
    counted: HashMap<String, usize>,
    total: usize,
    /// Child counts announced by flushes, by level name.
    expected: HashMap<String, usize>,
    committed: bool,
}

/// Everything a node's loop and kernel tasks share.
pub(crate) struct NodeShared {
    pub name: String,
    pub kernel: NodeKernel,
    pub concurrency: Concurrency,
    pub port_labels: Vec<String>,
    /// (port index, predicate label) for each gate.
    pub gate_ports: Vec<(usize, String)>,
    pub bindings: Vec<InputBinding>,
    pub routes: RouteTable,
    pub sink_targets: Vec<UnboundedSender<Delivery>>,
    pub flush_targets: Vec<UnboundedSender<Delivery>>,
    pub flush_expect: HashMap<String, usize>,
    pub counters: Arc<NodeCounters>,
    pub fatal: FatalFlag,
    pub tickets: Arc<TicketRegistry>,
}

/// Drives one node to quiescence: returns when the inbox closes and all
/// kernels have drained.
pub(crate) async fn run_node(shared: Arc<NodeShared>, mut inbox: UnboundedReceiver<Delivery>) {
    let join = Join::new(shared.port_labels.len().max(1));
    let semaphore = match shared.concurrency {
        Concurrency::Serial => Some(Arc::new(Semaphore::new(1))),
        Concurrency::Max(n) => Some(Arc::new(Semaphore::new(n.max(1)))),
        Concurrency::Unlimited => None,
    };
    let mut kernels: JoinSet<()> = JoinSet::new();
    let mut flush_seen: HashMap<u64, usize> = HashMap::new();

    loop {
        tokio::select! {
            delivery = inbox.recv() => match delivery {
                Some(Delivery::Data { message, port }) => {
                    if let Some(tuple) = join.insert(port, message) {
                        dispatch(&shared, &mut kernels, &semaphore, tuple).await;
                    }
                }
                Some(Delivery::Flush(token)) => {
                    let seen = flush_seen.entry(token.sequence).or_insert(0);
                    *seen += 1;
                    let expected = shared
                        .flush_expect
                        .get(token.origin.key())
                        .copied()
                        .unwrap_or(1);
                    if *seen >= expected {
                        flush_seen.remove(&token.sequence);
                        // Fence: no flush may pass data it arrived behind.
                        while let Some(result) = kernels.join_next().await {
                            observe_kernel(&shared, result);
                        }
                        if !shared.fatal.is_raised() {
                            if let Err(error) = process_flush(&shared, &token) {
                                shared.fatal.raise(error);
                            }
                        }
                        forward_flush(&shared, token);
                    }
                }
                None => break,
            },
            Some(result) = kernels.join_next(), if !kernels.is_empty() => {
                observe_kernel(&shared, result);
            }
        }
    }

    while let Some(result) = kernels.join_next().await {
        observe_kernel(&shared, result);
    }
    NodeDrained {
        node: &shared.name,
        executions: shared.counters.executions.load(Ordering::Relaxed),
    }
    .log();
}

fn panic_detail(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "opaque panic payload".to_string())
}

fn observe_kernel(shared: &NodeShared, result: Result<(), tokio::task::JoinError>) {
    if let Err(join_error) = result {
        if join_error.is_panic() {
            shared.fatal.raise(RuntimeError::KernelPanicked {
                node: shared.name.clone(),
                detail: panic_detail(join_error.into_panic()),
            });
        }
    }
}

/// Gate check plus concurrency-capped kernel spawn.
async fn dispatch(
    shared: &Arc<NodeShared>,
    kernels: &mut JoinSet<()>,
    semaphore: &Option<Arc<Semaphore>>,
    tuple: Vec<Message>,
) {
    for (port, label) in &shared.gate_ports {
        match gate_value(&tuple[*port], label) {
            Ok(true) => {}
            Ok(false) => return,
            Err(error) => {
                shared.fatal.raise(error);
                return;
            }
        }
    }

    let permit = match semaphore {
        Some(semaphore) => match semaphore.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => return,
        },
        None => None,
    };
    if shared.fatal.is_raised() {
        return;
    }

    let shared = shared.clone();
    kernels.spawn(async move {
        let _permit = permit;
        if shared.fatal.is_raised() {
            return;
        }
        // Catching here (rather than at join time) makes the fatal flag
        // visible before this node's permit is released.
        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run_kernel(&shared, tuple)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => shared.fatal.raise(error),
            Err(payload) => shared.fatal.raise(RuntimeError::KernelPanicked {
                node: shared.name.clone(),
                detail: panic_detail(payload),
            }),
        }
    });
}

fn gate_value(message: &Message, label: &str) -> Result<bool, RuntimeError> {
    let erased = message
        .store
        .find_erased(label)
        .ok_or_else(|| RuntimeError::MissingProduct {
            node: "gate".to_string(),
            label: label.to_string(),
            id: message.store.id().to_string(),
        })?;
    erased
        .downcast_ref::<bool>()
        .copied()
        .ok_or_else(|| RuntimeError::ProductTypeMismatch {
            label: label.to_string(),
            id: message.store.id().to_string(),
            expected: "bool",
        })
}

fn kernel_failure(shared: &NodeShared, error: KernelError) -> RuntimeError {
    RuntimeError::KernelFailed {
        node: shared.name.clone(),
        detail: error.to_string(),
    }
}

/// Gathers the kernel arguments in declared order.
fn resolve_args(shared: &NodeShared, tuple: &[Message]) -> Result<Vec<ErasedProduct>, RuntimeError> {
    let primary = &tuple[0];
    shared
        .bindings
        .iter()
        .map(|binding| match binding {
            InputBinding::Port(index) => {
                let message = &tuple[*index];
                let label = &shared.port_labels[*index];
                message
                    .store
                    .find_erased(label)
                    .ok_or_else(|| RuntimeError::MissingProduct {
                        node: shared.name.clone(),
                        label: label.clone(),
                        id: message.store.id().to_string(),
                    })
            }
            InputBinding::Ancestry(label) => {
                let store = match &label.level {
                    Some(level) => primary.store.ancestor_store(level).ok_or_else(|| {
                        RuntimeError::MissingProduct {
                            node: shared.name.clone(),
                            label: label.name.clone(),
                            id: primary.store.id().to_string(),
                        }
                    })?,
                    None => primary.store.clone(),
                };
                store
                    .find_erased(&label.name)
                    .ok_or_else(|| RuntimeError::MissingProduct {
                        node: shared.name.clone(),
                        label: label.name.clone(),
                        id: store.id().to_string(),
                    })
            }
        })
        .collect()
}

/// Sends one data message to the routed consumers and once to each sink.
fn emit_data(shared: &NodeShared, store: &Arc<ProductStore>, labels: &[String], ticket: u64) {
    let message = Message {
        store: store.clone(),
        original_id: store.id().clone(),
        ticket,
    };
    for label in labels {
        shared.routes.route(label, &message);
    }
    for sink in &shared.sink_targets {
        let _ = sink.send(Delivery::Data {
            message: message.clone(),
            port: 0,
        });
    }
}

fn run_kernel(shared: &NodeShared, tuple: Vec<Message>) -> Result<(), RuntimeError> {
    match &shared.kernel {
        NodeKernel::Transform { call, outputs } => {
            let args = resolve_args(shared, &tuple)?;
            shared.counters.executions.fetch_add(1, Ordering::Relaxed);
            let produced = (**call)(&args).map_err(|e| kernel_failure(shared, e))?;
            let store = tuple[0].store.clone();
            for (label, value) in outputs.iter().zip(produced.into_iter()) {
                store.add_erased(label, value)?;
            }
            emit_data(shared, &store, outputs, tuple[0].ticket);
            Ok(())
        }
        NodeKernel::Predicate { call, label } => {
            let args = resolve_args(shared, &tuple)?;
            shared.counters.executions.fetch_add(1, Ordering::Relaxed);
            let verdict = (**call)(&args).map_err(|e| kernel_failure(shared, e))?;
            let store = tuple[0].store.clone();
            store.add_product(label, verdict)?;
            emit_data(shared, &store, std::slice::from_ref(label), tuple[0].ticket);
            Ok(())
        }
        NodeKernel::Observer { call } => {
            let args = resolve_args(shared, &tuple)?;
            shared.counters.executions.fetch_add(1, Ordering::Relaxed);
            (**call)(&args).map_err(|e| kernel_failure(shared, e))
        }
        NodeKernel::Sink { call } => {
            shared.counters.executions.fetch_add(1, Ordering::Relaxed);
            (**call)(&tuple[0].store).map_err(|e| kernel_failure(shared, e))
        }
        NodeKernel::Fold(fold) => run_fold(shared, fold, &tuple),
        NodeKernel::Unfold {
            expand,
            into_label,
            family,
        } => run_unfold(shared, expand, into_label, family, &tuple),
    }
}

fn run_fold(shared: &NodeShared, fold: &FoldState, tuple: &[Message]) -> Result<(), RuntimeError> {
    let primary = &tuple[0];
    // Inputs with no ancestor at the partition level sit outside every
    // partition of this fold and are not for it.
    let Some(partition_store) = primary.store.ancestor_store(&fold.partition) else {
        return Ok(());
    };
    let args = resolve_args(shared, tuple)?;
    let cell = fold.cell_for(partition_store.id());
    let mut state = cell
        .state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if state.committed {
        return Err(RuntimeError::FoldInputAfterCommit {
            node: shared.name.clone(),
            partition: partition_store.id().to_string(),
        });
    }
    if state.accumulator.is_none() {
        state.accumulator = Some((*fold.init)());
    }
    if state.store.is_none() {
        state.store = Some(partition_store.clone());
    }
    let Some(accumulator) = state.accumulator.as_mut() else {
        return Err(RuntimeError::Internal {
            detail: "fold accumulator vanished".to_string(),
        });
    };
    shared.counters.executions.fetch_add(1, Ordering::Relaxed);
    (*fold.call)(accumulator.as_mut(), &args).map_err(|e| kernel_failure(shared, e))?;
    state.total += 1;
    *state
        .counted
        .entry(primary.store.level_name().to_string())
        .or_insert(0) += 1;
    Ok(())
}

fn run_unfold(
    shared: &NodeShared,
    expand: &UnfoldCall,
    into_label: &str,
    family: &str,
    tuple: &[Message],
) -> Result<(), RuntimeError> {
    let args = resolve_args(shared, tuple)?;
    let parent = tuple[0].store.clone();
    shared.counters.executions.fetch_add(1, Ordering::Relaxed);

    let labels = [into_label.to_string()];
    let mut index = 0usize;
    let mut emit_error: Option<RuntimeError> = None;
    let emitted = (**expand)(&args[0], &mut |chunk| {
        let child = parent.make_child(index, family, &shared.name);
        index += 1;
        if let Err(error) = child.add_erased(into_label, chunk) {
            let detail = error.to_string();
            emit_error = Some(error);
            return Err(KernelError::EmitFailed { detail });
        }
        let ticket = shared.tickets.ticket_for(child.id());
        emit_data(shared, &child, &labels, ticket);
        Ok(())
    });

    let emitted = match emitted {
        Ok(count) => count,
        Err(kernel_error) => {
            return Err(emit_error.unwrap_or_else(|| kernel_failure(shared, kernel_error)))
        }
    };

    // The family is closed the moment the expansion finishes; the flush
    // carries the child count any fold partitioned above it needs.
    let mut child_counts = BTreeMap::new();
    child_counts.insert(family.to_string(), emitted);
    let token = Arc::new(FlushToken {
        store: parent,
        child_counts,
        sequence: shared.tickets.next_sequence(),
        origin: FlushOrigin::Unfold(shared.name.clone()),
    });
    for target in &shared.flush_targets {
        let _ = target.send(Delivery::Flush(token.clone()));
    }
    Ok(())
}

/// Kind-specific flush handling; runs in the node loop after the fence.
fn process_flush(shared: &NodeShared, token: &FlushToken) -> Result<(), RuntimeError> {
    match &shared.kernel {
        NodeKernel::Fold(fold) => fold_flush(shared, fold, token),
        _ => Ok(()),
    }
}

fn fold_flush(shared: &NodeShared, fold: &FoldState, token: &FlushToken) -> Result<(), RuntimeError> {
    let Some(partition_id) = token.id().ancestor(&fold.partition) else {
        return Ok(());
    };
    let cell = fold.cell_for(&partition_id);
    let mut state = cell
        .state
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    for (level, count) in &token.child_counts {
        *state.expected.entry(level.clone()).or_insert(0) += count;
    }

    // Only the flush for the partition itself closes it.
    if token.id().level_name() != fold.partition || state.committed {
        return Ok(());
    }

    let expected_total: usize = state
        .counted
        .keys()
        .map(|level| state.expected.get(level).copied().unwrap_or(0))
        .sum();
    if state.total != expected_total {
        return Err(RuntimeError::InconsistentFlush {
            node: shared.name.clone(),
            partition: partition_id.to_string(),
            expected: expected_total,
            actual: state.total,
        });
    }

    let store = match state.store.clone() {
        Some(store) => store,
        None => token.store.clone(),
    };
    let accumulator = match state.accumulator.take() {
        Some(accumulator) => accumulator,
        None => (*fold.init)(),
    };
    state.committed = true;
    drop(state);

    let product: ErasedProduct = Arc::from(accumulator);
    store.add_erased(&fold.output, product)?;
    let ticket = shared.tickets.ticket_for(store.id());
    emit_data(shared, &store, std::slice::from_ref(&fold.output), ticket);
    Ok(())
}

fn forward_flush(shared: &NodeShared, token: Arc<FlushToken>) {
    for target in &shared.flush_targets {
        let _ = target.send(Delivery::Flush(token.clone()));
    }
}
