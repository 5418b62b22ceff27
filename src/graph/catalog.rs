// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The node catalog: everything the builder has declared, kind by kind.

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::RegistrationError;
use crate::graph::kernels::{
    FoldCall, FoldInit, ObserverCall, PredicateCall, SinkCall, TransformCall, UnfoldCall,
};
use crate::graph::labels::{ProductLabel, QualifiedName};

/// Maximum in-flight kernel invocations for one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Concurrency {
    /// One at a time, in arrival order.
    Serial,
    /// No per-node cap; bounded only by the worker pool.
    Unlimited,
    /// At most `N` at a time, N >= 1.
    Max(usize),
}

impl fmt::Display for Concurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concurrency::Serial => write!(f, "serial"),
            Concurrency::Unlimited => write!(f, "unlimited"),
            Concurrency::Max(n) => write!(f, "max({})", n),
        }
    }
}

pub struct TransformSpec {
    pub name: QualifiedName,
    pub concurrency: Concurrency,
    pub gates: Vec<String>,
    pub inputs: Vec<ProductLabel>,
    pub outputs: Vec<String>,
    pub level: Option<String>,
    pub arity: usize,
    pub call: TransformCall,
}

pub struct PredicateSpec {
    pub name: QualifiedName,
    pub concurrency: Concurrency,
    pub gates: Vec<String>,
    pub inputs: Vec<ProductLabel>,
    pub level: Option<String>,
    pub arity: usize,
    pub call: PredicateCall,
}

pub struct ObserverSpec {
    pub name: QualifiedName,
    pub concurrency: Concurrency,
    pub gates: Vec<String>,
    pub inputs: Vec<ProductLabel>,
    pub level: Option<String>,
    pub arity: usize,
    pub call: ObserverCall,
}

pub struct FoldSpec {
    pub name: QualifiedName,
    pub concurrency: Concurrency,
    pub gates: Vec<String>,
    pub inputs: Vec<ProductLabel>,
    pub output: String,
    pub partition: String,
    pub arity: usize,
    pub call: FoldCall,
    /// Filled by `initialized_with(...)`; a fold left without one is a
    /// registration error.
    pub init: Option<FoldInit>,
}

pub struct UnfoldSpec {
    pub name: QualifiedName,
    pub concurrency: Concurrency,
    pub key: ProductLabel,
    pub into_label: String,
    pub family: String,
    pub expand: UnfoldCall,
}

pub struct SinkSpec {
    pub name: QualifiedName,
    pub concurrency: Concurrency,
    pub call: SinkCall,
}

/// Owns the per-kind registrations, keyed by qualified name.
///
/// Registration is append-only; duplicate qualified names (across kinds)
/// are recorded in the shared error list rather than failing fast, so a
/// whole configuration's mistakes surface together at `execute()`.
#[derive(Default)]
pub struct NodeCatalog {
    pub transforms: BTreeMap<QualifiedName, TransformSpec>,
    pub predicates: BTreeMap<QualifiedName, PredicateSpec>,
    pub observers: BTreeMap<QualifiedName, ObserverSpec>,
    pub folds: BTreeMap<QualifiedName, FoldSpec>,
    pub unfolds: BTreeMap<QualifiedName, UnfoldSpec>,
    pub sinks: BTreeMap<QualifiedName, SinkSpec>,
}

impl NodeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
            + self.predicates.len()
            + self.observers.len()
            + self.folds.len()
            + self.unfolds.len()
            + self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &QualifiedName) -> bool {
        self.transforms.contains_key(name)
            || self.predicates.contains_key(name)
            || self.observers.contains_key(name)
            || self.folds.contains_key(name)
            || self.unfolds.contains_key(name)
            || self.sinks.contains_key(name)
    }

    fn claim(&self, name: &QualifiedName, errors: &mut Vec<RegistrationError>) -> bool {
        if self.contains(name) {
            errors.push(RegistrationError::DuplicateName { name: name.full() });
            return false;
        }
        true
    }

    pub fn register_transform(
        &mut self,
        spec: TransformSpec,
        errors: &mut Vec<RegistrationError>,
    ) {
        if self.claim(&spec.name, errors) {
            self.transforms.insert(spec.name.clone(), spec);
        }
    }

    pub fn register_predicate(
        &mut self,
        spec: PredicateSpec,
        errors: &mut Vec<RegistrationError>,
    ) {
        if self.claim(&spec.name, errors) {
            self.predicates.insert(spec.name.clone(), spec);
        }
    }

    pub fn register_observer(&mut self, spec: ObserverSpec, errors: &mut Vec<RegistrationError>) {
        if self.claim(&spec.name, errors) {
            self.observers.insert(spec.name.clone(), spec);
        }
    }

    pub fn register_fold(&mut self, spec: FoldSpec, errors: &mut Vec<RegistrationError>) {
        if self.claim(&spec.name, errors) {
            self.folds.insert(spec.name.clone(), spec);
        }
    }

    pub fn register_unfold(&mut self, spec: UnfoldSpec, errors: &mut Vec<RegistrationError>) {
        if self.claim(&spec.name, errors) {
            self.unfolds.insert(spec.name.clone(), spec);
        }
    }

    pub fn register_sink(&mut self, spec: SinkSpec, errors: &mut Vec<RegistrationError>) {
        if self.claim(&spec.name, errors) {
            self.sinks.insert(spec.name.clone(), spec);
        }
    }

    /// All node names, for diagnostics and the Graphviz export.
    pub fn names(&self) -> Vec<QualifiedName> {
        let mut names: Vec<QualifiedName> = self
            .transforms
            .keys()
            .chain(self.predicates.keys())
            .chain(self.observers.keys())
            .chain(self.folds.keys())
            .chain(self.unfolds.keys())
            .chain(self.sinks.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }
}
