// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The declarative graph builder.
//!
//! User code declares nodes through a small fluent surface and the builder
//! records them into the catalog, erasing the typed kernels as each chain
//! is finalized:
//!
//! ```ignore
//! let mut g = FlowGraph::new(source);
//! g.with("square", |n: &i32| n * n, Concurrency::Unlimited)
//!     .transform("number")
//!     .to("squared");
//! g.with("add", |acc: &mut i32, sq: &i32| *acc += sq, Concurrency::Unlimited)
//!     .fold("squared")
//!     .partitioned_by("run")
//!     .to("total")
//!     .initialized_with(15);
//! g.execute().await?;
//! ```
//!
//! Nothing is validated while chains run; arity, labels, gate references,
//! producer uniqueness, and acyclicity are all checked when the graph is
//! materialized at `execute()`, and every violation is reported together.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::runner::{self, ExecutionSummary};
use crate::errors::{FrameworkError, RegistrationError};
use crate::graph::catalog::{
    Concurrency, FoldSpec, NodeCatalog, ObserverSpec, PredicateSpec, SinkSpec, TransformSpec,
    UnfoldSpec,
};
use crate::graph::kernels::{
    erase_unfold, AccumulateKernel, FoldCall, FoldInit, FunctionKernel, ObserverCall, OutputSpec,
    PredicateCall, SinkCall, TransformCall, Unfold,
};
use crate::graph::labels::{IntoLabel, IntoLabels, IntoNames, ProductLabel, QualifiedName};
use crate::model::ProductStore;
use crate::source::{IntoSource, Source, SourceSpec};

/// The graph under construction: a source plus the node catalog.
pub struct FlowGraph {
    pub(crate) source: SourceSpec,
    pub(crate) catalog: NodeCatalog,
    pub(crate) errors: Vec<RegistrationError>,
    pub(crate) max_parallelism: Option<usize>,
    pub(crate) dot_path: Option<PathBuf>,
}

impl std::fmt::Debug for FlowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowGraph")
            .field("errors", &self.errors)
            .field("max_parallelism", &self.max_parallelism)
            .field("dot_path", &self.dot_path)
            .finish_non_exhaustive()
    }
}

impl FlowGraph {
    /// A graph fed by an async closure over a [`Yielder`].
    ///
    /// [`Yielder`]: crate::source::Yielder
    pub fn new(source: impl IntoSource) -> Self {
        FlowGraph {
            source: source.into_source(),
            catalog: NodeCatalog::new(),
            errors: Vec::new(),
            max_parallelism: None,
            dot_path: None,
        }
    }

    /// A graph fed by a boxed source plugin object.
    pub fn from_source(source: Box<dyn Source>) -> Self {
        FlowGraph {
            source: SourceSpec::Object(source),
            catalog: NodeCatalog::new(),
            errors: Vec::new(),
            max_parallelism: None,
            dot_path: None,
        }
    }

    /// A graph whose source yields exactly one store.
    pub fn run_once(store: Arc<ProductStore>) -> Self {
        FlowGraph {
            source: SourceSpec::Once(store),
            catalog: NodeCatalog::new(),
            errors: Vec::new(),
            max_parallelism: None,
            dot_path: None,
        }
    }

    /// Attaches a free function or closure under `name`; the returned
    /// binder picks the node kind.
    pub fn with<F>(&mut self, name: impl Into<String>, kernel: F, concurrency: Concurrency) -> Binder<'_, F> {
        Binder {
            graph: self,
            name: QualifiedName::bare(name),
            kernel,
            concurrency,
            gates: Vec::new(),
        }
    }

    /// Attaches a stateful expansion type; one object per identifier is
    /// built lazily from the key product when it first arrives.
    pub fn with_unfold<U: Unfold>(
        &mut self,
        name: impl Into<String>,
        concurrency: Concurrency,
    ) -> UnfoldBinder<'_, U> {
        UnfoldBinder {
            graph: self,
            name: QualifiedName::bare(name),
            concurrency,
            _unfold: PhantomData,
        }
    }

    /// Constructs a long-lived framework-visible object, used to register
    /// output sinks.
    pub fn make<T: Send + Sync + 'static>(&mut self, object: T) -> ObjectBinder<'_, T> {
        ObjectBinder {
            graph: self,
            module: None,
            object: Arc::new(object),
        }
    }

    /// Caps the worker pool; defaults to the host's hardware concurrency.
    pub fn set_max_parallelism(&mut self, workers: usize) {
        self.max_parallelism = Some(workers.max(1));
    }

    /// Writes a Graphviz description of the materialized graph to `path`
    /// during `execute()`.
    pub fn export_graph(&mut self, path: impl Into<PathBuf>) {
        self.dot_path = Some(path.into());
    }

    /// A registration scope for a plugin module: node names registered
    /// through it are qualified with `module_label`.
    pub fn scoped(&mut self, module_label: impl Into<String>) -> ModuleScope<'_> {
        ModuleScope {
            graph: self,
            label: module_label.into(),
        }
    }

    /// Drives the graph to quiescence.
    ///
    /// Fails without starting if any registration error was recorded;
    /// otherwise runs the source to exhaustion, drains every node, and
    /// reports per-node execution counts.
    pub async fn execute(self) -> Result<ExecutionSummary, FrameworkError> {
        runner::execute(self).await
    }
}

/// Registration scope handed to module plugins; everything registered
/// through it carries the module label in its qualified name.
pub struct ModuleScope<'g> {
    graph: &'g mut FlowGraph,
    label: String,
}

impl<'g> ModuleScope<'g> {
    pub fn module_label(&self) -> &str {
        &self.label
    }

    pub fn with<F>(
        &mut self,
        name: impl Into<String>,
        kernel: F,
        concurrency: Concurrency,
    ) -> Binder<'_, F> {
        Binder {
            name: QualifiedName::scoped(self.label.clone(), name),
            graph: &mut *self.graph,
            kernel,
            concurrency,
            gates: Vec::new(),
        }
    }

    pub fn with_unfold<U: Unfold>(
        &mut self,
        name: impl Into<String>,
        concurrency: Concurrency,
    ) -> UnfoldBinder<'_, U> {
        UnfoldBinder {
            name: QualifiedName::scoped(self.label.clone(), name),
            graph: &mut *self.graph,
            concurrency,
            _unfold: PhantomData,
        }
    }

    pub fn make<T: Send + Sync + 'static>(&mut self, object: T) -> ObjectBinder<'_, T> {
        ObjectBinder {
            module: Some(self.label.clone()),
            graph: &mut *self.graph,
            object: Arc::new(object),
        }
    }
}

/// A function attached by `with(...)`, waiting for its node kind.
pub struct Binder<'g, F> {
    graph: &'g mut FlowGraph,
    name: QualifiedName,
    kernel: F,
    concurrency: Concurrency,
    gates: Vec<String>,
}

impl<'g, F> Binder<'g, F> {
    /// Gates this node on the named predicates (logical AND).
    pub fn when(mut self, predicates: impl IntoNames) -> Self {
        self.gates.extend(predicates.into_names());
        self
    }

    /// Declares a transform consuming `inputs`; finish with `.to(...)`.
    pub fn transform<Args, R>(self, inputs: impl IntoLabels) -> TransformTo<'g, F, Args, R>
    where
        F: FunctionKernel<Args, R>,
    {
        TransformTo {
            graph: self.graph,
            name: self.name,
            kernel: self.kernel,
            concurrency: self.concurrency,
            gates: self.gates,
            inputs: inputs.into_labels(),
            level: None,
            _marker: PhantomData,
        }
    }

    /// Declares a read-only observer of `inputs`.
    pub fn observe<Args>(self, inputs: impl IntoLabels)
    where
        F: FunctionKernel<Args, ()>,
    {
        let arity = self.kernel.arity();
        let kernel = self.kernel;
        let call: ObserverCall = Arc::new(move |args| kernel.call(args));
        let spec = ObserverSpec {
            name: self.name,
            concurrency: self.concurrency,
            gates: self.gates,
            inputs: inputs.into_labels(),
            level: None,
            arity,
            call,
        };
        self.graph.catalog.register_observer(spec, &mut self.graph.errors);
    }

    /// Declares a predicate over `inputs`; its boolean output is published
    /// under the node's qualified name.
    pub fn filter<Args>(self, inputs: impl IntoLabels)
    where
        F: FunctionKernel<Args, bool>,
    {
        let arity = self.kernel.arity();
        let kernel = self.kernel;
        let call: PredicateCall = Arc::new(move |args| kernel.call(args));
        let spec = PredicateSpec {
            name: self.name,
            concurrency: self.concurrency,
            gates: self.gates,
            inputs: inputs.into_labels(),
            level: None,
            arity,
            call,
        };
        self.graph.catalog.register_predicate(spec, &mut self.graph.errors);
    }

    /// Declares a fold over `inputs`; continue with
    /// `.partitioned_by(..).to(..).initialized_with(..)`.
    pub fn fold<Args, R>(self, inputs: impl IntoLabels) -> FoldPartition<'g, F, Args, R>
    where
        F: AccumulateKernel<Args, R>,
    {
        FoldPartition {
            graph: self.graph,
            name: self.name,
            kernel: self.kernel,
            concurrency: self.concurrency,
            gates: self.gates,
            inputs: inputs.into_labels(),
            _marker: PhantomData,
        }
    }
}

/// Transform chain: inputs declared, outputs pending.
pub struct TransformTo<'g, F, Args, R> {
    graph: &'g mut FlowGraph,
    name: QualifiedName,
    kernel: F,
    concurrency: Concurrency,
    gates: Vec<String>,
    inputs: Vec<ProductLabel>,
    level: Option<String>,
    _marker: PhantomData<fn() -> (Args, R)>,
}

impl<'g, F, Args, R> TransformTo<'g, F, Args, R>
where
    F: FunctionKernel<Args, R>,
    R: 'static,
{
    /// Scopes the transform to fire at the named level.
    pub fn for_each(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    /// Declares the output labels and registers the node. A single label
    /// publishes the whole return value; a tuple of labels splits a tuple
    /// return value elementwise.
    pub fn to<S: OutputSpec<R>>(self, outputs: S) {
        let labels = outputs.labels();
        let split = outputs.splitter();
        let arity = self.kernel.arity();
        let kernel = self.kernel;
        let call: TransformCall = Arc::new(move |args| Ok(split(kernel.call(args)?)));
        let spec = TransformSpec {
            name: self.name,
            concurrency: self.concurrency,
            gates: self.gates,
            inputs: self.inputs,
            outputs: labels,
            level: self.level,
            arity,
            call,
        };
        self.graph.catalog.register_transform(spec, &mut self.graph.errors);
    }
}

/// Fold chain: inputs declared, partition level pending.
pub struct FoldPartition<'g, F, Args, R> {
    graph: &'g mut FlowGraph,
    name: QualifiedName,
    kernel: F,
    concurrency: Concurrency,
    gates: Vec<String>,
    inputs: Vec<ProductLabel>,
    _marker: PhantomData<fn() -> (Args, R)>,
}

impl<'g, F, Args, R> FoldPartition<'g, F, Args, R>
where
    F: AccumulateKernel<Args, R>,
    R: Send + Sync + 'static,
{
    /// The level at which this fold accumulates and commits.
    pub fn partitioned_by(self, level: impl Into<String>) -> FoldOutput<'g, F, Args, R> {
        FoldOutput {
            graph: self.graph,
            name: self.name,
            kernel: self.kernel,
            concurrency: self.concurrency,
            gates: self.gates,
            inputs: self.inputs,
            partition: level.into(),
            _marker: PhantomData,
        }
    }
}

/// Fold chain: partition declared, output label pending.
pub struct FoldOutput<'g, F, Args, R> {
    graph: &'g mut FlowGraph,
    name: QualifiedName,
    kernel: F,
    concurrency: Concurrency,
    gates: Vec<String>,
    inputs: Vec<ProductLabel>,
    partition: String,
    _marker: PhantomData<fn() -> (Args, R)>,
}

impl<'g, F, Args, R> FoldOutput<'g, F, Args, R>
where
    F: AccumulateKernel<Args, R>,
    R: Send + Sync + 'static,
{
    /// The label the committed accumulator is published under. The fold is
    /// registered here with an empty initializer slot; `initialized_with`
    /// fills it, and a slot still empty at `execute()` is a registration
    /// error.
    pub fn to(self, output: impl Into<String>) -> FoldInitializer<'g, R> {
        let arity = self.kernel.arity();
        let kernel = self.kernel;
        let call: FoldCall = Arc::new(move |accumulator, args| {
            let accumulator = accumulator
                .downcast_mut::<R>()
                .ok_or(crate::graph::kernels::KernelError::AccumulatorType {
                    expected: std::any::type_name::<R>(),
                })?;
            kernel.call(accumulator, args)
        });
        let name = self.name.clone();
        let spec = FoldSpec {
            name: self.name,
            concurrency: self.concurrency,
            gates: self.gates,
            inputs: self.inputs,
            output: output.into(),
            partition: self.partition,
            arity,
            call,
            init: None,
        };
        self.graph.catalog.register_fold(spec, &mut self.graph.errors);
        FoldInitializer {
            graph: self.graph,
            name,
            _marker: PhantomData,
        }
    }
}

/// Fold chain: registered, initializer pending.
pub struct FoldInitializer<'g, R> {
    graph: &'g mut FlowGraph,
    name: QualifiedName,
    _marker: PhantomData<fn() -> R>,
}

impl<'g, R> FoldInitializer<'g, R>
where
    R: Clone + Send + Sync + 'static,
{
    /// The accumulator every partition starts from.
    pub fn initialized_with(self, init: R) {
        let init: FoldInit = Arc::new(move || Box::new(init.clone()));
        if let Some(spec) = self.graph.catalog.folds.get_mut(&self.name) {
            spec.init = Some(init);
        }
    }
}

/// Unfold chain: stateful type attached, key label pending.
pub struct UnfoldBinder<'g, U: Unfold> {
    graph: &'g mut FlowGraph,
    name: QualifiedName,
    concurrency: Concurrency,
    _unfold: PhantomData<fn() -> U>,
}

impl<'g, U: Unfold> UnfoldBinder<'g, U> {
    /// The product that seeds one expansion per identifier.
    pub fn unfold(self, key: impl IntoLabel) -> UnfoldInto<'g, U> {
        UnfoldInto {
            graph: self.graph,
            name: self.name,
            concurrency: self.concurrency,
            key: key.into_label(),
            _unfold: PhantomData,
        }
    }
}

/// Unfold chain: key declared, chunk label pending.
pub struct UnfoldInto<'g, U: Unfold> {
    graph: &'g mut FlowGraph,
    name: QualifiedName,
    concurrency: Concurrency,
    key: ProductLabel,
    _unfold: PhantomData<fn() -> U>,
}

impl<'g, U: Unfold> UnfoldInto<'g, U> {
    /// The label each emitted chunk is published under.
    pub fn into(self, chunk_label: impl Into<String>) -> UnfoldFamily<'g, U> {
        UnfoldFamily {
            graph: self.graph,
            name: self.name,
            concurrency: self.concurrency,
            key: self.key,
            into_label: chunk_label.into(),
            _unfold: PhantomData,
        }
    }
}

/// Unfold chain: chunk label declared, family level pending.
pub struct UnfoldFamily<'g, U: Unfold> {
    graph: &'g mut FlowGraph,
    name: QualifiedName,
    concurrency: Concurrency,
    key: ProductLabel,
    into_label: String,
    _unfold: PhantomData<fn() -> U>,
}

impl<'g, U: Unfold> UnfoldFamily<'g, U> {
    /// The new level name the chunk stores are created at; registers the
    /// node.
    pub fn within_family(self, level_name: impl Into<String>) {
        let spec = UnfoldSpec {
            name: self.name,
            concurrency: self.concurrency,
            key: self.key,
            into_label: self.into_label,
            family: level_name.into(),
            expand: erase_unfold::<U>(),
        };
        self.graph.catalog.register_unfold(spec, &mut self.graph.errors);
    }
}

/// A long-lived object created by `make(...)`.
pub struct ObjectBinder<'g, T> {
    graph: &'g mut FlowGraph,
    module: Option<String>,
    object: Arc<T>,
}

impl<'g, T: Send + Sync + 'static> ObjectBinder<'g, T> {
    /// A handle to the made object; useful for inspecting it after
    /// execution.
    pub fn handle(&self) -> Arc<T> {
        self.object.clone()
    }

    /// Registers `method` as an output sink: it is called once for every
    /// store emitted by a producing node.
    pub fn output_with<M>(self, name: impl Into<String>, method: M, concurrency: Concurrency)
    where
        M: Fn(&T, &ProductStore) + Send + Sync + 'static,
    {
        let object = self.object.clone();
        let call: SinkCall = Arc::new(move |store| {
            method(&object, store);
            Ok(())
        });
        let name = match &self.module {
            Some(module) => QualifiedName::scoped(module.clone(), name),
            None => QualifiedName::bare(name),
        };
        let spec = SinkSpec {
            name,
            concurrency,
            call,
        };
        self.graph.catalog.register_sink(spec, &mut self.graph.errors);
    }
}
