// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! Each message type implements `Display` for the human-readable rendering
//! and `StructuredLog` for emission with machine-readable fields.

pub mod engine;
pub mod source;

/// Trait for messages that support structured logging.
///
/// `log()` emits the message at its natural level together with its fields,
/// so log consumers can filter on the fields without parsing the rendered
/// text.
pub trait StructuredLog {
    fn log(&self);
}
