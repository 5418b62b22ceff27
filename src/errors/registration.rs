// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

/// Errors detected while declaring nodes or validating the assembled graph.
///
/// These are collected into a shared list as registration proceeds and
/// surfaced together by `execute()`; a single bad declaration never aborts
/// the declaration phase on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationError {
    /// Two nodes were registered under the same qualified name.
    DuplicateName { name: String },
    /// The number of declared input labels does not match the kernel's
    /// parameter count.
    ArityMismatch {
        node: String,
        expected: usize,
        actual: usize,
    },
    /// A `when(...)` clause names a predicate that was never declared.
    UnknownPredicate { node: String, predicate: String },
    /// A fold reached `execute()` without `initialized_with(...)`.
    MissingInitializer { node: String },
    /// A product label was declared empty.
    EmptyLabel { node: String },
    /// Two nodes both claim to produce the same output label.
    DuplicateProducer {
        label: String,
        first: String,
        second: String,
    },
    /// An unfold declared an empty family level name.
    EmptyFamily { node: String },
    /// The node graph contains a cycle.
    CyclicGraph { cycle: Vec<String> },
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationError::DuplicateName { name } => {
                write!(f, "duplicate node name: '{}'", name)
            }
            RegistrationError::ArityMismatch {
                node,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "node '{}' takes {} input(s) but {} label(s) were declared",
                    node, expected, actual
                )
            }
            RegistrationError::UnknownPredicate { node, predicate } => {
                write!(
                    f,
                    "node '{}' is gated on '{}' which is not a declared predicate",
                    node, predicate
                )
            }
            RegistrationError::MissingInitializer { node } => {
                write!(f, "fold '{}' was never given an initializer", node)
            }
            RegistrationError::EmptyLabel { node } => {
                write!(f, "node '{}' declared an empty product label", node)
            }
            RegistrationError::DuplicateProducer {
                label,
                first,
                second,
            } => {
                write!(
                    f,
                    "product label '{}' is produced by both '{}' and '{}'",
                    label, first, second
                )
            }
            RegistrationError::EmptyFamily { node } => {
                write!(f, "unfold '{}' declared an empty family level name", node)
            }
            RegistrationError::CyclicGraph { cycle } => {
                write!(f, "node graph contains a cycle: {}", cycle.join(" -> "))
            }
        }
    }
}

impl std::error::Error for RegistrationError {}
