// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod loader;
mod module_config;

#[cfg(test)]
mod integration_tests;

pub use loader::{load_job_config, JobConfig, ModuleSpec, PluginSpec};
pub use module_config::ModuleConfig;
