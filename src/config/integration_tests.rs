// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Config-to-execution round trips through the plugin registry.

use std::io::Write;

use crate::config::load_job_config;
use crate::plugins::PluginRegistry;

fn write_config(dir: &tempfile::TempDir, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("create");
    file.write_all(text.as_bytes()).expect("write");
    path
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_json_job_document_runs_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        &dir,
        "job.json",
        r#"{
            "source": {"plugin": "number_generator", "config": {"max_numbers": 6}},
            "modules": [
                {"plugin": "running_sum", "module_label": "totals", "config": {"initial": 100}}
            ],
            "max_allowed_parallelism": 2
        }"#,
    );

    let job = load_job_config(&path).expect("loads");
    let registry = PluginRegistry::with_builtins();
    let graph = registry.build_graph(&job).expect("resolves");

    let summary = graph.execute().await.expect("runs");
    // One job store plus six events.
    assert_eq!(summary.source_yields(), 7);
    assert_eq!(summary.execution_count("totals:add"), 6);
    assert_eq!(summary.execution_count("totals:report"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_yaml_job_document_runs_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        &dir,
        "job.yaml",
        concat!(
            "source:\n",
            "  plugin: number_generator\n",
            "  config:\n",
            "    max_numbers: 3\n",
            "modules:\n",
            "  - plugin: running_sum\n",
            "    module_label: totals\n",
        ),
    );

    let job = load_job_config(&path).expect("loads");
    let registry = PluginRegistry::with_builtins();
    let graph = registry.build_graph(&job).expect("resolves");

    let summary = graph.execute().await.expect("runs");
    assert_eq!(summary.source_yields(), 4);
    assert_eq!(summary.execution_count("totals:add"), 3);
}
