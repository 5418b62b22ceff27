// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Hierarchical identifiers for points in the context tree.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The level name of the root of every context tree.
pub const JOB_LEVEL: &str = "job";

/// An immutable path identifying a point in the context tree.
///
/// A `LevelId` is an ordered sequence of `(index, level-name)` pairs rooted
/// at the empty "job" level: `job`, `job/run:0`, `job/run:0/event:3`, and so
/// on. Identifiers are cheap to clone (each component is shared behind an
/// `Arc` and links to its parent) and carry a precomputed hash so they can
/// serve as keys in the concurrent maps the scheduler keeps per node.
///
/// Two identifiers compare equal exactly when their pair sequences are
/// equal, and `make_child(n, l).parent()` always returns the original
/// identifier.
#[derive(Clone)]
pub struct LevelId {
    inner: Arc<Inner>,
}

struct Inner {
    parent: Option<LevelId>,
    level_name: String,
    number: usize,
    depth: usize,
    hash: u64,
}

impl LevelId {
    /// The root identifier: depth 0, level name "job".
    pub fn base() -> Self {
        let mut hasher = DefaultHasher::new();
        JOB_LEVEL.hash(&mut hasher);
        LevelId {
            inner: Arc::new(Inner {
                parent: None,
                level_name: JOB_LEVEL.to_string(),
                number: 0,
                depth: 0,
                hash: hasher.finish(),
            }),
        }
    }

    /// Extends this identifier by one `(number, level_name)` pair.
    pub fn make_child(&self, number: usize, level_name: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        self.inner.hash.hash(&mut hasher);
        level_name.hash(&mut hasher);
        number.hash(&mut hasher);
        LevelId {
            inner: Arc::new(Inner {
                parent: Some(self.clone()),
                level_name: level_name.to_string(),
                number,
                depth: self.inner.depth + 1,
                hash: hasher.finish(),
            }),
        }
    }

    /// Number of `(index, name)` pairs; 0 at the root.
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    /// Name at the deepest pair, or "job" at the root.
    pub fn level_name(&self) -> &str {
        &self.inner.level_name
    }

    /// Index at the deepest pair; 0 at the root.
    pub fn number(&self) -> usize {
        self.inner.number
    }

    /// The identifier one level up, or `None` at the root.
    pub fn parent(&self) -> Option<&LevelId> {
        self.inner.parent.as_ref()
    }

    /// Walks toward the root looking for the named level.
    ///
    /// The search includes this identifier itself, so
    /// `id.ancestor(id.level_name())` returns `id`.
    pub fn ancestor(&self, level_name: &str) -> Option<LevelId> {
        let mut current = Some(self);
        while let Some(id) = current {
            if id.level_name() == level_name {
                return Some(id.clone());
            }
            current = id.parent();
        }
        None
    }

    /// True when `other` appears on this identifier's parent chain
    /// (including this identifier itself).
    pub fn descends_from(&self, other: &LevelId) -> bool {
        if other.depth() > self.depth() {
            return false;
        }
        let mut current = Some(self);
        while let Some(id) = current {
            if id == other {
                return true;
            }
            current = id.parent();
        }
        false
    }
}

impl PartialEq for LevelId {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        if self.inner.depth != other.inner.depth || self.inner.hash != other.inner.hash {
            return false;
        }
        if self.inner.number != other.inner.number || self.inner.level_name != other.inner.level_name
        {
            return false;
        }
        match (&self.inner.parent, &other.inner.parent) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for LevelId {}

impl Hash for LevelId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.inner.hash);
    }
}

impl fmt::Display for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parent() {
            None => write!(f, "{}", self.level_name()),
            Some(parent) => write!(f, "{}/{}:{}", parent, self.level_name(), self.number()),
        }
    }
}

impl fmt::Debug for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LevelId({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn base_is_the_job_level() {
        let id = LevelId::base();
        assert_eq!(id.depth(), 0);
        assert_eq!(id.level_name(), "job");
        assert_eq!(id.number(), 0);
        assert!(id.parent().is_none());
    }

    #[test]
    fn make_child_round_trips_through_parent() {
        let job = LevelId::base();
        let run = job.make_child(2, "run");
        let event = run.make_child(7, "event");

        assert_eq!(event.depth(), 2);
        assert_eq!(event.level_name(), "event");
        assert_eq!(event.number(), 7);
        assert_eq!(event.parent(), Some(&run));
        assert_eq!(run.parent(), Some(&job));
    }

    #[test]
    fn equality_is_pairwise() {
        let a = LevelId::base().make_child(1, "run").make_child(3, "event");
        let b = LevelId::base().make_child(1, "run").make_child(3, "event");
        let c = LevelId::base().make_child(1, "run").make_child(4, "event");
        let d = LevelId::base().make_child(1, "spill").make_child(3, "event");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn hash_is_stable_across_reconstruction() {
        let mut counts: HashMap<LevelId, usize> = HashMap::new();
        counts.insert(LevelId::base().make_child(0, "run"), 5);

        let again = LevelId::base().make_child(0, "run");
        assert_eq!(counts.get(&again), Some(&5));
    }

    #[test]
    fn ancestor_finds_the_named_level() {
        let event = LevelId::base().make_child(0, "run").make_child(4, "event");

        assert_eq!(event.ancestor("event"), Some(event.clone()));
        assert_eq!(event.ancestor("run"), Some(LevelId::base().make_child(0, "run")));
        assert_eq!(event.ancestor("job"), Some(LevelId::base()));
        assert_eq!(event.ancestor("spill"), None);
    }

    #[test]
    fn descends_from_walks_the_chain() {
        let job = LevelId::base();
        let run = job.make_child(0, "run");
        let event = run.make_child(1, "event");
        let other_run = job.make_child(1, "run");

        assert!(event.descends_from(&run));
        assert!(event.descends_from(&job));
        assert!(event.descends_from(&event));
        assert!(!event.descends_from(&other_run));
        assert!(!run.descends_from(&event));
    }

    #[test]
    fn display_renders_the_path() {
        let event = LevelId::base().make_child(0, "run").make_child(4, "event");
        assert_eq!(event.to_string(), "job/run:0/event:4");
        assert_eq!(LevelId::base().to_string(), "job");
    }
}
