// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Thin command-line front-end: load a job document, resolve its plugins,
//! run the graph.
//!
//! Exit codes: 0 on success, 1 for command-line mistakes, 2 for
//! configuration or initialization problems, 3 for a fatal runtime error.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use the_strata::config::load_job_config;
use the_strata::plugins::PluginRegistry;

const VERSION: &str = env!("CARGO_PKG_VERSION");

struct CliOptions {
    config: PathBuf,
    graph_file: Option<PathBuf>,
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {} -c <config-file> [--graph <dot-file>]\n\n\
         Options:\n\
         \x20 -c, --config <FILE>   Job configuration (.json, .yaml, .yml)\n\
         \x20     --graph <FILE>    Write a Graphviz description of the graph\n\
         \x20 -h, --help            Print this help\n\
         \x20     --version         Print the version",
        program
    )
}

fn parse_args(args: &[String]) -> Result<Option<CliOptions>, String> {
    let program = args.first().map(String::as_str).unwrap_or("the-strata");
    let mut config = None;
    let mut graph_file = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("{}", usage(program));
                return Ok(None);
            }
            "--version" => {
                println!("the-strata {}", VERSION);
                return Ok(None);
            }
            "-c" | "--config" => match iter.next() {
                Some(value) => config = Some(PathBuf::from(value)),
                None => return Err(format!("{} requires a file argument", arg)),
            },
            "--graph" => match iter.next() {
                Some(value) => graph_file = Some(PathBuf::from(value)),
                None => return Err("--graph requires a file argument".to_string()),
            },
            other => return Err(format!("unrecognized argument '{}'", other)),
        }
    }

    match config {
        Some(config) => Ok(Some(CliOptions { config, graph_file })),
        None => Err("no configuration file given".to_string()),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let options = match parse_args(&args) {
        Ok(Some(options)) => options,
        Ok(None) => return ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("Error: {}", message);
            eprintln!();
            eprintln!("{}", usage(args.first().map(String::as_str).unwrap_or("the-strata")));
            return ExitCode::from(1);
        }
    };

    let job = match load_job_config(&options.config) {
        Ok(job) => job,
        Err(error) => {
            eprintln!("Error: {}", error);
            return ExitCode::from(2);
        }
    };
    let workers = match job.parallelism() {
        Ok(workers) => workers,
        Err(error) => {
            eprintln!("Error: {}", error);
            return ExitCode::from(2);
        }
    };

    let registry = PluginRegistry::with_builtins();
    let mut graph = match registry.build_graph(&job) {
        Ok(graph) => graph,
        Err(error) => {
            eprintln!("Error: {}", error);
            return ExitCode::from(2);
        }
    };
    if let Some(path) = &options.graph_file {
        graph.export_graph(path.clone());
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("Error: failed to start worker pool: {}", error);
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(graph.execute()) {
        Ok(summary) => {
            println!(
                "Processed {} store(s) in {:?}",
                summary.source_yields(),
                summary.duration()
            );
            let mut names: Vec<&String> = summary.executions().keys().collect();
            names.sort();
            for name in names {
                println!("  {:>8}  {}", summary.execution_count(name), name);
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("Error: {}", error);
            ExitCode::from(3)
        }
    }
}
