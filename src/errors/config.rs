// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors for configuration-document loading and plugin resolution.

use thiserror::Error;

/// Errors that can occur while loading a job configuration or while
/// resolving plugins against it.
///
/// Everything in this enum is reported before the graph starts; a process
/// front-end maps these to exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("unsupported configuration format '{extension}' (expected .json, .yaml, or .yml)")]
    UnsupportedFormat { extension: String },

    #[error("missing required configuration key '{key}'")]
    MissingKey { key: String },

    #[error("configuration key '{key}' has the wrong type (expected {expected})")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("unknown {kind} plugin '{name}'")]
    UnknownPlugin { kind: &'static str, name: String },

    #[error("{kind} plugin '{name}' failed to initialize: {message}")]
    PluginFailed {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("max_allowed_parallelism must be at least 1 (got {value})")]
    InvalidParallelism { value: usize },
}
