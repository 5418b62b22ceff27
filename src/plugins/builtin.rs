// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Built-in demo plugins, enough to run a job document end to end.

use async_trait::async_trait;

use crate::config::ModuleConfig;
use crate::graph::catalog::Concurrency;
use crate::model::ProductStore;
use crate::plugins::PluginRegistry;
use crate::source::{Source, Yielder};

/// Yields one job store and `max_numbers` event stores carrying the
/// products `i` (1-based) and `j` (its negation).
struct NumberGenerator {
    max_numbers: i64,
}

#[async_trait]
impl Source for NumberGenerator {
    async fn produce(&self, out: Yielder) -> anyhow::Result<()> {
        let job = ProductStore::base("number_generator");
        out.yield_store(job.clone()).await?;

        for i in 1..=self.max_numbers {
            let event = job.make_child(i as usize, "event", "number_generator");
            event.add_product("i", i)?;
            event.add_product("j", -i)?;
            out.yield_store(event).await?;
        }
        Ok(())
    }
}

/// Folds the `i` products into a job-wide sum and reports it.
fn running_sum(
    scope: &mut crate::graph::builder::ModuleScope<'_>,
    config: &ModuleConfig,
) -> anyhow::Result<()> {
    let initial = config.get_or("initial", 0i64)?;

    scope
        .with("add", |sum: &mut i64, i: &i64| *sum += i, Concurrency::Unlimited)
        .fold("i")
        .partitioned_by("job")
        .to("i_sum")
        .initialized_with(initial);

    scope
        .with(
            "report",
            |sum: &i64| tracing::info!(sum, "running sum committed"),
            Concurrency::Serial,
        )
        .observe("i_sum");

    Ok(())
}

/// Registers every built-in plugin into `registry`.
pub fn register(registry: &mut PluginRegistry) {
    registry.register_source(
        "number_generator",
        Box::new(|config: &ModuleConfig| {
            let max_numbers = config.get_or("max_numbers", 10i64)?;
            Ok(Box::new(NumberGenerator { max_numbers }) as Box<dyn Source>)
        }),
    );

    registry.register_module(
        "running_sum",
        Box::new(|scope, config| running_sum(scope, config)),
    );
}
