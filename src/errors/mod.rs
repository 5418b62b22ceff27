// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod config;
mod registration;
mod runtime;

pub use config::ConfigError;
pub use registration::RegistrationError;
pub use runtime::RuntimeError;

use std::fmt;

/// Top-level error returned by `FlowGraph::execute`.
///
/// Registration problems are aggregated: every violation found while the
/// graph was being declared and validated is reported together, so a user
/// can fix a whole configuration in one pass instead of replaying the
/// build once per mistake.
#[derive(Debug)]
pub enum FrameworkError {
    /// One or more declaration/validation errors; execution never started.
    Registration(Vec<RegistrationError>),
    /// A fatal runtime error; the first one observed is carried verbatim.
    Runtime(RuntimeError),
}

impl FrameworkError {
    /// The registration errors, if this is a registration failure.
    pub fn registration_errors(&self) -> Option<&[RegistrationError]> {
        match self {
            FrameworkError::Registration(errors) => Some(errors),
            FrameworkError::Runtime(_) => None,
        }
    }
}

impl fmt::Display for FrameworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameworkError::Registration(errors) => {
                writeln!(f, "graph registration failed with {} error(s):", errors.len())?;
                for (i, e) in errors.iter().enumerate() {
                    writeln!(f, "  {}. {}", i + 1, e)?;
                }
                Ok(())
            }
            FrameworkError::Runtime(e) => write!(f, "graph execution failed: {}", e),
        }
    }
}

impl std::error::Error for FrameworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameworkError::Registration(_) => None,
            FrameworkError::Runtime(e) => Some(e),
        }
    }
}

impl From<RuntimeError> for FrameworkError {
    fn from(e: RuntimeError) -> Self {
        FrameworkError::Runtime(e)
    }
}
