// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod config;        // job documents + plugin option bags
pub mod engine;        // scheduler: nodes, join, multiplexer, runner
pub mod errors;        // error handling
pub mod graph;         // catalog, builder, validation
pub mod model;         // identifiers, stores, messages
pub mod observability;
pub mod plugins;       // plugin registration contract
pub mod source;        // suspendable source driver

pub use engine::ExecutionSummary;
pub use errors::{ConfigError, FrameworkError, RegistrationError, RuntimeError};
pub use graph::{in_level, Concurrency, FlowGraph, Unfold};
pub use model::{LevelId, ProductStore};
pub use source::{Source, Yielder};
