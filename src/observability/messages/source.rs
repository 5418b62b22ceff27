//! Message types for source driver events.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};

/// The source ran out of stores.
///
/// # Log Level
/// `debug!` - Lifecycle detail
pub struct SourceExhausted {
    pub stores: usize,
    pub flushes: usize,
}

impl Display for SourceExhausted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Source exhausted after {} store(s) and {} flush token(s)",
            self.stores, self.flushes
        )
    }
}

impl StructuredLog for SourceExhausted {
    fn log(&self) {
        tracing::debug!(stores = self.stores, flushes = self.flushes, "{}", self);
    }
}
