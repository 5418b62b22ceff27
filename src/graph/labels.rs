// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Names and labels: how nodes and products are addressed.

use std::fmt;

/// The unique name of a node in the graph: an optional module label (set
/// when a plugin registers the node) plus the algorithm name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    module: Option<String>,
    name: String,
}

impl QualifiedName {
    /// A name registered outside any plugin module.
    pub fn bare(name: impl Into<String>) -> Self {
        QualifiedName {
            module: None,
            name: name.into(),
        }
    }

    /// A name registered by the plugin module `module`.
    pub fn scoped(module: impl Into<String>, name: impl Into<String>) -> Self {
        QualifiedName {
            module: Some(module.into()),
            name: name.into(),
        }
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full rendering used in logs, errors, and predicate labels:
    /// `module:name`, or just `name` when unscoped.
    pub fn full(&self) -> String {
        match &self.module {
            Some(module) => format!("{}:{}", module, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(module) => write!(f, "{}:{}", module, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A product label as declared on a node input, optionally qualified with
/// the level name the product is expected to live at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductLabel {
    pub name: String,
    pub level: Option<String>,
}

impl ProductLabel {
    pub fn unqualified(name: impl Into<String>) -> Self {
        ProductLabel {
            name: name.into(),
            level: None,
        }
    }
}

impl fmt::Display for ProductLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.level {
            Some(level) => write!(f, "{}@{}", self.name, level),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Qualifies a product label with the level it is expected at, e.g.
/// `in_level("wgen", "spill")`.
pub fn in_level(name: impl Into<String>, level: impl Into<String>) -> ProductLabel {
    ProductLabel {
        name: name.into(),
        level: Some(level.into()),
    }
}

/// Conversion into a single input label.
pub trait IntoLabel {
    fn into_label(self) -> ProductLabel;
}

impl IntoLabel for &str {
    fn into_label(self) -> ProductLabel {
        ProductLabel::unqualified(self)
    }
}

impl IntoLabel for String {
    fn into_label(self) -> ProductLabel {
        ProductLabel::unqualified(self)
    }
}

impl IntoLabel for ProductLabel {
    fn into_label(self) -> ProductLabel {
        self
    }
}

/// Conversion into an ordered input-label list. Implemented for a single
/// label and for tuples of labels; arity against the kernel is checked at
/// validation time.
pub trait IntoLabels {
    fn into_labels(self) -> Vec<ProductLabel>;
}

impl<T: IntoLabel> IntoLabels for T {
    fn into_labels(self) -> Vec<ProductLabel> {
        vec![self.into_label()]
    }
}

impl<A: IntoLabel, B: IntoLabel> IntoLabels for (A, B) {
    fn into_labels(self) -> Vec<ProductLabel> {
        vec![self.0.into_label(), self.1.into_label()]
    }
}

impl<A: IntoLabel, B: IntoLabel, C: IntoLabel> IntoLabels for (A, B, C) {
    fn into_labels(self) -> Vec<ProductLabel> {
        vec![self.0.into_label(), self.1.into_label(), self.2.into_label()]
    }
}

impl<A: IntoLabel, B: IntoLabel, C: IntoLabel, D: IntoLabel> IntoLabels for (A, B, C, D) {
    fn into_labels(self) -> Vec<ProductLabel> {
        vec![
            self.0.into_label(),
            self.1.into_label(),
            self.2.into_label(),
            self.3.into_label(),
        ]
    }
}

/// Conversion into a list of plain names, used by `when(...)`.
pub trait IntoNames {
    fn into_names(self) -> Vec<String>;
}

impl IntoNames for &str {
    fn into_names(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoNames for String {
    fn into_names(self) -> Vec<String> {
        vec![self]
    }
}

impl<const N: usize> IntoNames for [&str; N] {
    fn into_names(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl IntoNames for Vec<String> {
    fn into_names(self) -> Vec<String> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names_render_with_module() {
        assert_eq!(QualifiedName::bare("square").full(), "square");
        assert_eq!(QualifiedName::scoped("waves", "square").full(), "waves:square");
    }

    #[test]
    fn label_tuples_preserve_order() {
        let labels = ("a", in_level("b", "run"), "c").into_labels();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[0].name, "a");
        assert_eq!(labels[1].level.as_deref(), Some("run"));
        assert_eq!(labels[2].name, "c");
    }

    #[test]
    fn single_labels_convert() {
        let labels = "number".into_labels();
        assert_eq!(labels, vec![ProductLabel::unqualified("number")]);
    }
}
