// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The plugin registration contract.
//!
//! A source plugin is a factory `(config) -> Source`; a module plugin is a
//! factory `(builder, config) -> ()` that performs `with(...)` / `make(...)`
//! calls on the provided registration scope. The registry is static: the
//! process front-end registers the plugins it links against and resolves a
//! job document against them. Dynamic loading stays outside the core.

pub mod builtin;

use std::collections::HashMap;

use crate::config::{JobConfig, ModuleConfig};
use crate::errors::ConfigError;
use crate::graph::builder::{FlowGraph, ModuleScope};
use crate::source::Source;

pub type SourceFactory =
    Box<dyn Fn(&ModuleConfig) -> anyhow::Result<Box<dyn Source>> + Send + Sync>;
pub type ModuleFactory =
    Box<dyn Fn(&mut ModuleScope<'_>, &ModuleConfig) -> anyhow::Result<()> + Send + Sync>;

/// Static name-to-factory tables for sources and modules.
#[derive(Default)]
pub struct PluginRegistry {
    sources: HashMap<String, SourceFactory>,
    modules: HashMap<String, ModuleFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in demo plugins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    pub fn register_source(&mut self, name: impl Into<String>, factory: SourceFactory) {
        self.sources.insert(name.into(), factory);
    }

    pub fn register_module(&mut self, name: impl Into<String>, factory: ModuleFactory) {
        self.modules.insert(name.into(), factory);
    }

    pub fn source_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn module_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolves a job document into a ready-to-execute graph.
    pub fn build_graph(&self, job: &JobConfig) -> Result<FlowGraph, ConfigError> {
        let source_factory =
            self.sources
                .get(&job.source.plugin)
                .ok_or_else(|| ConfigError::UnknownPlugin {
                    kind: "source",
                    name: job.source.plugin.clone(),
                })?;
        let source = source_factory(&job.source.config).map_err(|error| {
            ConfigError::PluginFailed {
                kind: "source",
                name: job.source.plugin.clone(),
                message: format!("{:#}", error),
            }
        })?;

        let mut graph = FlowGraph::from_source(source);
        if let Some(workers) = job.max_allowed_parallelism {
            graph.set_max_parallelism(workers);
        }

        for module in &job.modules {
            let factory =
                self.modules
                    .get(&module.plugin)
                    .ok_or_else(|| ConfigError::UnknownPlugin {
                        kind: "module",
                        name: module.plugin.clone(),
                    })?;
            let mut scope = graph.scoped(module.module_label.clone());
            factory(&mut scope, &module.config).map_err(|error| ConfigError::PluginFailed {
                kind: "module",
                name: module.plugin.clone(),
                message: format!("{:#}", error),
            })?;
        }

        Ok(graph)
    }
}
