//! Per-node coalescing of multi-input arrivals.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::Message;

/// Coalesces N port arrivals sharing a ticket into one N-tuple.
///
/// A completed tuple is popped and returned exactly once; partial tuples
/// for distinct tickets never interact. Single-port nodes bypass the map
/// entirely. Flush tokens never enter the join: they take the control path
/// in the node loop.
pub(crate) struct Join {
    arity: usize,
    pending: Mutex<HashMap<u64, Partial>>,
}

struct Partial {
    slots: Vec<Option<Message>>,
    filled: usize,
}

impl Join {
    pub fn new(arity: usize) -> Self {
        Join {
            arity,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Records an arrival; returns the completed tuple (in port order) when
    /// this arrival fills the last empty slot.
    pub fn insert(&self, port: usize, message: Message) -> Option<Vec<Message>> {
        if self.arity == 1 {
            return Some(vec![message]);
        }

        let ticket = message.ticket;
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let partial = pending.entry(ticket).or_insert_with(|| Partial {
            slots: (0..self.arity).map(|_| None).collect(),
            filled: 0,
        });
        if partial.slots[port].is_some() {
            // A port saw the same ticket twice; the first arrival wins.
            tracing::debug!(port, ticket, "duplicate join arrival dropped");
            return None;
        }
        partial.slots[port] = Some(message);
        partial.filled += 1;
        if partial.filled < self.arity {
            return None;
        }
        let complete = pending.remove(&ticket)?;
        Some(complete.slots.into_iter().flatten().collect())
    }

    /// Number of tickets still waiting for more arrivals.
    pub fn pending_len(&self) -> usize {
        if self.arity == 1 {
            return 0;
        }
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
