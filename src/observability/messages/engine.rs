// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for graph lifecycle and node events.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};

/// Execution started.
///
/// # Log Level
/// `info!` - Important operational event
pub struct ExecutionStarted {
    pub node_count: usize,
}

impl Display for ExecutionStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Starting graph execution with {} node(s)", self.node_count)
    }
}

impl StructuredLog for ExecutionStarted {
    fn log(&self) {
        tracing::info!(node_count = self.node_count, "{}", self);
    }
}

/// Execution reached quiescence.
///
/// # Log Level
/// `info!` - Important operational event
pub struct ExecutionCompleted {
    pub node_count: usize,
    pub stores: usize,
    pub duration: std::time::Duration,
}

impl Display for ExecutionCompleted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Graph execution completed: {} node(s), {} store(s) in {:?}",
            self.node_count, self.stores, self.duration
        )
    }
}

impl StructuredLog for ExecutionCompleted {
    fn log(&self) {
        tracing::info!(
            node_count = self.node_count,
            stores = self.stores,
            duration_ms = self.duration.as_millis() as u64,
            "{}",
            self
        );
    }
}

/// Execution ended with a fatal error.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct ExecutionFailed<'a> {
    pub error: &'a dyn std::error::Error,
}

impl Display for ExecutionFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Graph execution failed: {}", self.error)
    }
}

impl StructuredLog for ExecutionFailed<'_> {
    fn log(&self) {
        tracing::error!(error = %self.error, "{}", self);
    }
}

/// A node drained its inbox and shut down.
///
/// # Log Level
/// `debug!` - Per-node detail
pub struct NodeDrained<'a> {
    pub node: &'a str,
    pub executions: usize,
}

impl Display for NodeDrained<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Node '{}' drained after {} execution(s)",
            self.node, self.executions
        )
    }
}

impl StructuredLog for NodeDrained<'_> {
    fn log(&self) {
        tracing::debug!(node = self.node, executions = self.executions, "{}", self);
    }
}
