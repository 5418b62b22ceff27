// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Fatal runtime errors.
//!
//! Every variant here is fatal: the first one observed is stored, the
//! fatal flag is raised, and the scheduler drains outstanding work without
//! dispatching anything new. There is no per-message retry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("node '{node}' failed: {detail}")]
    KernelFailed { node: String, detail: String },

    #[error("node '{node}' panicked: {detail}")]
    KernelPanicked { node: String, detail: String },

    #[error("source failed: {detail}")]
    SourceFailed { detail: String },

    #[error("node '{node}' requires product '{label}' which is not present at {id}")]
    MissingProduct {
        node: String,
        label: String,
        id: String,
    },

    #[error("product '{label}' at {id} is not of the expected type {expected}")]
    ProductTypeMismatch {
        label: String,
        id: String,
        expected: &'static str,
    },

    #[error("product '{label}' was already added to store {id}")]
    DuplicateProduct { label: String, id: String },

    #[error("product label must be a non-empty string (store {id})")]
    EmptyProductLabel { id: String },

    #[error("a different store for {id} is already in flight")]
    DuplicateStore { id: String },

    #[error("source yielded store {id} whose parent was never yielded")]
    OrphanStore { id: String },

    #[error(
        "fold '{node}' saw {actual} input(s) for partition {partition} but the flush announced {expected}"
    )]
    InconsistentFlush {
        node: String,
        partition: String,
        expected: usize,
        actual: usize,
    },

    #[error("fold '{node}' received input for partition {partition} after it was committed")]
    FoldInputAfterCommit { node: String, partition: String },

    #[error("failed to write graph description to '{path}': {detail}")]
    GraphExport { path: String, detail: String },

    #[error("internal error: {detail}")]
    Internal { detail: String },
}
