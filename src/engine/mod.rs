// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod join;
pub mod multiplexer;
pub mod node;
pub mod runner;

#[cfg(test)]
mod integration_tests;

pub use runner::ExecutionSummary;
