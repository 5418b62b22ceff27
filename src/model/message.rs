// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Messages, flush tokens, and the ticket registry that keeps joins honest.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::model::{LevelId, ProductStore};

/// A store in flight through the graph.
///
/// `original_id` records which source-emitted store caused this message and
/// `ticket` is the monotonically increasing number assigned to that store;
/// equal tickets mean "same source event", which is what per-node joins key
/// on.
#[derive(Clone)]
pub struct Message {
    pub store: Arc<ProductStore>,
    pub original_id: LevelId,
    pub ticket: u64,
}

impl Message {
    pub fn new(store: Arc<ProductStore>, ticket: u64) -> Self {
        let original_id = store.id().clone();
        Message {
            store,
            original_id,
            ticket,
        }
    }
}

/// Where a flush token was minted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlushOrigin {
    /// Emitted by the graph runner as the source closed a level.
    Source,
    /// Emitted by the named unfold after expanding a store.
    Unfold(String),
}

impl FlushOrigin {
    /// Stable key used for per-origin flush fan-in accounting.
    pub fn key(&self) -> &str {
        match self {
            FlushOrigin::Source => "source",
            FlushOrigin::Unfold(name) => name,
        }
    }
}

/// The end-of-group marker that drives fold completion.
///
/// A flush token closes the subtree rooted at `store`: it carries no
/// products, only the closed store itself, the count of its direct children
/// per level name, a unique sequence number, and the producer that minted
/// it. It is propagated exactly once to every node that can observe it and
/// can never overtake the data messages it fences.
#[derive(Clone)]
pub struct FlushToken {
    pub store: Arc<ProductStore>,
    pub child_counts: BTreeMap<String, usize>,
    pub sequence: u64,
    pub origin: FlushOrigin,
}

impl FlushToken {
    pub fn id(&self) -> &LevelId {
        self.store.id()
    }

    /// Total direct children of the closed store, across level names.
    pub fn expected_children(&self) -> usize {
        self.child_counts.values().sum()
    }
}

impl std::fmt::Debug for FlushToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushToken")
            .field("id", self.id())
            .field("child_counts", &self.child_counts)
            .field("sequence", &self.sequence)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Issues message tickets and flush sequence numbers.
///
/// Tickets are memoized per store identifier: every producer that emits a
/// message for the same store uses the same ticket, which is what lets a
/// downstream join line up products added to one store by different
/// upstream nodes. Flush sequence numbers are simply unique.
pub struct TicketRegistry {
    next_ticket: AtomicU64,
    next_sequence: AtomicU64,
    assigned: Mutex<HashMap<LevelId, u64>>,
}

impl TicketRegistry {
    pub fn new() -> Self {
        TicketRegistry {
            next_ticket: AtomicU64::new(0),
            next_sequence: AtomicU64::new(0),
            assigned: Mutex::new(HashMap::new()),
        }
    }

    /// The ticket for `id`, allocating one on first sight.
    pub fn ticket_for(&self, id: &LevelId) -> u64 {
        let mut assigned = self
            .assigned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(&ticket) = assigned.get(id) {
            return ticket;
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        assigned.insert(id.clone(), ticket);
        ticket
    }

    /// A fresh flush sequence number.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for TicketRegistry {
    fn default() -> Self {
        Self::new()
    }
}
