// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Graphviz export of the materialized graph.

use std::fmt::Write as _;
use std::path::Path;

use crate::errors::RuntimeError;
use crate::graph::validation::{GraphPlan, KernelPlan};

fn shape_for(kernel: &KernelPlan) -> &'static str {
    match kernel {
        KernelPlan::Transform { .. } => "box",
        KernelPlan::Predicate { .. } => "diamond",
        KernelPlan::Observer { .. } => "ellipse",
        KernelPlan::Fold { .. } => "house",
        KernelPlan::Unfold { .. } => "invhouse",
        KernelPlan::Sink { .. } => "note",
    }
}

/// Renders the plan as a Graphviz digraph keyed by qualified names.
pub(crate) fn render(plan: &GraphPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph flow {{");
    let _ = writeln!(out, "  rankdir=LR;");
    let _ = writeln!(out, "  source [shape=cds];");

    for node in &plan.nodes {
        let _ = writeln!(
            out,
            "  \"{}\" [shape={}, xlabel=\"{}\"];",
            node.name.full(),
            shape_for(&node.kernel),
            node.kernel.kind_name()
        );
    }

    for port in &plan.source_ports {
        let _ = writeln!(
            out,
            "  source -> \"{}\" [label=\"{}\"];",
            plan.nodes[port.node].name.full(),
            port.label
        );
    }

    for node in &plan.nodes {
        for (label, consumers) in &node.out_routes {
            for &(consumer, _) in consumers {
                let _ = writeln!(
                    out,
                    "  \"{}\" -> \"{}\" [label=\"{}\"];",
                    node.name.full(),
                    plan.nodes[consumer].name.full(),
                    label
                );
            }
        }
        for &sink in &node.sink_targets {
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\" [style=dashed];",
                node.name.full(),
                plan.nodes[sink].name.full()
            );
        }
    }

    let _ = writeln!(out, "}}");
    out
}

/// Writes the rendered digraph to `path`.
pub(crate) fn write_dot(plan: &GraphPlan, path: &Path) -> Result<(), RuntimeError> {
    std::fs::write(path, render(plan)).map_err(|error| RuntimeError::GraphExport {
        path: path.display().to_string(),
        detail: error.to_string(),
    })
}
