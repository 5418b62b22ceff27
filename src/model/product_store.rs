// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Context-scoped bags of typed data products.

use std::any::Any;
use std::sync::{Arc, RwLock};

use crate::errors::RuntimeError;
use crate::model::LevelId;

/// A type-erased product handle as it lives inside a store.
pub type ErasedProduct = Arc<dyn Any + Send + Sync>;

/// A node in the context tree holding typed products.
///
/// Stores are write-once per label: a product added under a label is never
/// replaced, and concurrent readers observe either the pre- or post-add
/// state. A child store holds a strong reference to its parent, so looking
/// a label up the parent chain is well-defined for as long as any
/// descendant is alive.
///
/// Stores are always handled as `Arc<ProductStore>`; the `make_child`
/// constructor ties the child to its parent.
pub struct ProductStore {
    id: LevelId,
    parent: Option<Arc<ProductStore>>,
    source_tag: String,
    products: RwLock<Vec<(String, ErasedProduct)>>,
}

impl ProductStore {
    /// The root store of a context tree, at the "job" level.
    pub fn base(source_tag: &str) -> Arc<Self> {
        Arc::new(ProductStore {
            id: LevelId::base(),
            parent: None,
            source_tag: source_tag.to_string(),
            products: RwLock::new(Vec::new()),
        })
    }

    /// Creates a child store one level below this one.
    pub fn make_child(
        self: &Arc<Self>,
        number: usize,
        level_name: &str,
        source_tag: &str,
    ) -> Arc<ProductStore> {
        Arc::new(ProductStore {
            id: self.id.make_child(number, level_name),
            parent: Some(self.clone()),
            source_tag: source_tag.to_string(),
            products: RwLock::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &LevelId {
        &self.id
    }

    pub fn parent(&self) -> Option<&Arc<ProductStore>> {
        self.parent.as_ref()
    }

    /// Who created this store.
    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }

    pub fn level_name(&self) -> &str {
        self.id.level_name()
    }

    /// Adds a typed product under `label`.
    ///
    /// Labels are write-once; adding a second product under the same label
    /// is an error, as is an empty label.
    pub fn add_product<T: Send + Sync + 'static>(
        &self,
        label: &str,
        value: T,
    ) -> Result<(), RuntimeError> {
        self.add_erased(label, Arc::new(value))
    }

    /// Adds an already-erased product under `label`.
    pub fn add_erased(&self, label: &str, value: ErasedProduct) -> Result<(), RuntimeError> {
        if label.is_empty() {
            return Err(RuntimeError::EmptyProductLabel {
                id: self.id.to_string(),
            });
        }
        let mut products = self
            .products
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if products.iter().any(|(l, _)| l == label) {
            return Err(RuntimeError::DuplicateProduct {
                label: label.to_string(),
                id: self.id.to_string(),
            });
        }
        products.push((label.to_string(), value));
        Ok(())
    }

    /// True when `label` is present on this store (not its ancestors).
    pub fn contains(&self, label: &str) -> bool {
        self.products
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(|(l, _)| l == label)
    }

    /// The labels held locally by this store, in insertion order.
    pub fn labels(&self) -> Vec<String> {
        self.products
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(l, _)| l.clone())
            .collect()
    }

    /// Looks `label` up on this store and then along the parent chain.
    pub fn find_erased(&self, label: &str) -> Option<ErasedProduct> {
        let local = self
            .products
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, p)| p.clone());
        match local {
            Some(p) => Some(p),
            None => self.parent.as_ref().and_then(|p| p.find_erased(label)),
        }
    }

    /// Typed lookup of `label` on this store or its ancestors.
    pub fn get<T: Send + Sync + 'static>(&self, label: &str) -> Result<Arc<T>, RuntimeError> {
        let erased = self
            .find_erased(label)
            .ok_or_else(|| RuntimeError::MissingProduct {
                node: self.source_tag.clone(),
                label: label.to_string(),
                id: self.id.to_string(),
            })?;
        erased
            .downcast::<T>()
            .map_err(|_| RuntimeError::ProductTypeMismatch {
                label: label.to_string(),
                id: self.id.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// The store on this store's parent chain at the named level,
    /// including this store itself.
    pub fn ancestor_store(self: &Arc<Self>, level_name: &str) -> Option<Arc<ProductStore>> {
        let mut current = self.clone();
        loop {
            if current.level_name() == level_name {
                return Some(current);
            }
            match current.parent() {
                Some(parent) => current = parent.clone(),
                None => return None,
            }
        }
    }
}

impl std::fmt::Debug for ProductStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductStore")
            .field("id", &self.id)
            .field("source_tag", &self.source_tag)
            .field("labels", &self.labels())
            .finish()
    }
}
