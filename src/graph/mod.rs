// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod builder;
pub mod catalog;
pub mod dependency_graph;
pub mod dot;
pub mod kernels;
pub mod labels;
pub mod validation;

pub use builder::{Binder, FlowGraph, ModuleScope, ObjectBinder, UnfoldBinder};
pub use catalog::{Concurrency, NodeCatalog};
pub use dependency_graph::DependencyGraph;
pub use kernels::Unfold;
pub use labels::{in_level, ProductLabel, QualifiedName};
