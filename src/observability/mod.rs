// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! Message types follow a struct-based pattern with a `Display`
//! implementation plus the `StructuredLog` trait, keeping magic strings out
//! of the engine and making log output queryable by field.
//!
//! Messages are organized by subsystem:
//! * `messages::engine` - graph lifecycle and node events
//! * `messages::source` - source driver events

pub mod messages;
