// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! End-to-end graph executions over in-memory sources.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::{FrameworkError, RuntimeError};
use crate::graph::builder::FlowGraph;
use crate::graph::catalog::Concurrency;
use crate::graph::kernels::Unfold;
use crate::graph::labels::in_level;
use crate::model::ProductStore;
use crate::source::Yielder;

fn collector<T: Send>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync + Clone) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = seen.clone();
        move |value: T| {
            seen.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(value);
        }
    };
    (seen, sink)
}

fn collected<T: Clone>(seen: &Arc<Mutex<Vec<T>>>) -> Vec<T> {
    seen.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_source_completes_with_zero_counts() {
    let mut g = FlowGraph::new(|_out: Yielder| async { Ok(()) });
    g.with("square", |n: &i32| n * n, Concurrency::Unlimited)
        .transform("number")
        .to("squared");
    g.with("record", |_: &i32| {}, Concurrency::Serial)
        .observe("squared");

    let summary = g.execute().await.expect("empty execution succeeds");
    assert_eq!(summary.source_yields(), 0);
    assert_eq!(summary.execution_count("square"), 0);
    assert_eq!(summary.execution_count("record"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_once_delivers_the_single_store() {
    let store = ProductStore::base("test");
    store.add_product("number", 9i32).expect("add");

    let (seen, record) = collector::<i32>();
    let mut g = FlowGraph::run_once(store);
    g.with("record", move |n: &i32| record(*n), Concurrency::Serial)
        .observe("number");

    let summary = g.execute().await.expect("runs");
    assert_eq!(summary.source_yields(), 1);
    assert_eq!(collected(&seen), vec![9]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identity_transform_preserves_every_value() {
    let source = |out: Yielder| async move {
        let job = ProductStore::base("test");
        out.yield_store(job.clone()).await?;
        for i in 0..20i32 {
            let event = job.make_child(i as usize, "event", "test");
            event.add_product("number", i)?;
            out.yield_store(event).await?;
        }
        Ok(())
    };

    let (seen, record) = collector::<(i32, i32)>();
    let mut g = FlowGraph::new(source);
    g.with("copy", |n: &i32| *n, Concurrency::Unlimited)
        .transform("number")
        .to("copied");
    g.with(
        "compare",
        move |a: &i32, b: &i32| record((*a, *b)),
        Concurrency::Unlimited,
    )
    .observe(("number", "copied"));

    let summary = g.execute().await.expect("runs");
    assert_eq!(summary.execution_count("copy"), 20);
    assert_eq!(summary.execution_count("compare"), 20);
    for (a, b) in collected(&seen) {
        assert_eq!(a, b);
    }
}

/// Two folds over the same label at different partition levels: per-run
/// sums plus a job-wide sum fed by two different levels of the hierarchy.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn folds_commit_at_run_and_job_partitions() {
    let source = |out: Yielder| async move {
        let job = ProductStore::base("test");
        out.yield_store(job.clone()).await?;
        for r in 0..2usize {
            let run = job.make_child(r, "run", "test");
            out.yield_store(run.clone()).await?;
            for e in 0..5usize {
                let event = run.make_child(e, "event", "test");
                event.add_product("number", e as i64)?;
                out.yield_store(event).await?;
            }
        }
        for t in 0..10usize {
            let trigger = job.make_child(t, "trigger_primitive", "test");
            trigger.add_product("number", t as i64)?;
            out.yield_store(trigger).await?;
        }
        Ok(())
    };

    let (run_sums, record_run) = collector::<i64>();
    let (job_sums, record_job) = collector::<i64>();

    let mut g = FlowGraph::new(source);
    g.with("run_add", |sum: &mut i64, n: &i64| *sum += n, Concurrency::Unlimited)
        .fold("number")
        .partitioned_by("run")
        .to("run_sum")
        .initialized_with(0i64);
    g.with("job_add", |sum: &mut i64, n: &i64| *sum += n, Concurrency::Unlimited)
        .fold("number")
        .partitioned_by("job")
        .to("job_sum")
        .initialized_with(0i64);
    g.with("verify_run_sum", move |s: &i64| record_run(*s), Concurrency::Serial)
        .observe("run_sum");
    g.with("verify_job_sum", move |s: &i64| record_job(*s), Concurrency::Serial)
        .observe("job_sum");

    let summary = g.execute().await.expect("runs");

    // Ten events feed the run fold; the job fold also sees the ten
    // job-scoped trigger primitives.
    assert_eq!(summary.execution_count("run_add"), 10);
    assert_eq!(summary.execution_count("job_add"), 20);
    assert_eq!(summary.execution_count("verify_run_sum"), 2);
    assert_eq!(summary.execution_count("verify_job_sum"), 1);

    assert_eq!(collected(&run_sums), vec![10, 10]);
    assert_eq!(collected(&job_sums), vec![65]);
}

/// square -> fold-with-initializer -> scale, partitioned per run.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn squared_sums_scale_into_per_run_rms() {
    let source = |out: Yielder| async move {
        let job = ProductStore::base("test");
        out.yield_store(job.clone()).await?;
        for r in 0..2usize {
            let run = job.make_child(r, "run", "test");
            run.add_product("time", r as f64 * 0.5)?;
            out.yield_store(run.clone()).await?;
            for e in 0..5usize {
                let event = run.make_child(e, "event", "test");
                event.add_product("number", (e + r) as i64)?;
                out.yield_store(event).await?;
            }
        }
        Ok(())
    };

    let (results, record) = collector::<f64>();

    let mut g = FlowGraph::new(source);
    g.with("square", |n: &i64| n * n, Concurrency::Unlimited)
        .transform("number")
        .to("squared");
    g.with("add", |sum: &mut i64, sq: &i64| *sum += sq, Concurrency::Unlimited)
        .fold("squared")
        .partitioned_by("run")
        .to("added_data")
        .initialized_with(15i64);
    g.with(
        "scale",
        |total: &i64| (*total as f64 / 5.0).sqrt(),
        Concurrency::Unlimited,
    )
    .transform("added_data")
    .to("result");
    g.with("print_result", move |r: &f64| record(*r), Concurrency::Serial)
        .observe("result");

    let summary = g.execute().await.expect("runs");
    assert_eq!(summary.execution_count("square"), 10);
    assert_eq!(summary.execution_count("add"), 10);
    assert_eq!(summary.execution_count("scale"), 2);
    assert_eq!(summary.execution_count("print_result"), 2);

    let mut seen = collected(&results);
    seen.sort_by(|a, b| a.partial_cmp(b).expect("comparable"));
    let expected_for = |r: i64| {
        let total: i64 = 15 + (0..5).map(|e| (e + r) * (e + r)).sum::<i64>();
        (total as f64 / 5.0).sqrt()
    };
    let mut expected = vec![expected_for(0), expected_for(1)];
    expected.sort_by(|a, b| a.partial_cmp(b).expect("comparable"));
    assert_eq!(seen.len(), 2);
    for (s, e) in seen.iter().zip(expected.iter()) {
        assert!((s - e).abs() < 1e-12, "got {}, expected {}", s, e);
    }
}

#[derive(Clone)]
struct WaveformRequest {
    size: usize,
    spill_id: usize,
}

#[derive(Clone)]
struct Waveforms {
    values: Vec<f64>,
}

/// Generates waveforms in chunks of at most 256 until the requested size
/// is reached.
struct WaveformGenerator {
    maxsize: usize,
}

const CHUNK: usize = 256;

impl Unfold for WaveformGenerator {
    type Seed = WaveformRequest;
    type Value = usize;
    type Chunk = Waveforms;

    fn from_seed(seed: &WaveformRequest) -> Self {
        WaveformGenerator { maxsize: seed.size }
    }

    fn initial(&self) -> usize {
        0
    }

    fn keep_going(&self, made_so_far: &usize) -> bool {
        *made_so_far < self.maxsize
    }

    fn step(&self, made_so_far: usize) -> (usize, Waveforms) {
        let newsize = CHUNK.min(self.maxsize - made_so_far);
        let chunk = Waveforms {
            values: vec![12.5; newsize],
        };
        (made_so_far + newsize, chunk)
    }
}

#[derive(Clone, Default)]
struct SummedClampedWaveforms {
    size: usize,
    sum: f64,
}

#[derive(Default)]
struct SpillRecorder {
    levels: Mutex<Vec<String>>,
}

impl SpillRecorder {
    fn save(&self, store: &ProductStore) {
        self.levels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(store.level_name().to_string());
    }

    fn saved_at(&self, level: &str) -> usize {
        self.levels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|l| l.as_str() == level)
            .count()
    }
}

/// Unfold a 1000-wide request into ceil(1000/256) = 4 chunks, clamp each
/// chunk, and fold the clamped chunks back into one per-spill summary.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unfold_transform_fold_round_trip() {
    let source = |out: Yielder| async move {
        let job = ProductStore::base("test");
        out.yield_store(job.clone()).await?;
        let spill = job.make_child(0, "spill", "test");
        spill.add_product(
            "wgen",
            WaveformRequest {
                size: 1000,
                spill_id: 0,
            },
        )?;
        out.yield_store(spill).await?;
        Ok(())
    };

    let (summaries, record) = collector::<(usize, f64)>();

    let mut g = FlowGraph::new(source);
    g.with_unfold::<WaveformGenerator>("wave_gen", Concurrency::Unlimited)
        .unfold(in_level("wgen", "spill"))
        .into("waves_in_apa")
        .within_family("APA");
    g.with(
        "clamp",
        |w: &Waveforms| Waveforms {
            values: w.values.iter().map(|v| v.clamp(0.0, 10.0)).collect(),
        },
        Concurrency::Unlimited,
    )
    .transform("waves_in_apa")
    .for_each("APA")
    .to("clamped_waves");
    g.with(
        "accum_for_spill",
        |acc: &mut SummedClampedWaveforms, w: &Waveforms| {
            acc.size += w.values.len();
            acc.sum += w.values.iter().sum::<f64>();
        },
        Concurrency::Unlimited,
    )
    .fold(in_level("clamped_waves", "APA"))
    .partitioned_by("spill")
    .to("summed_waveforms")
    .initialized_with(SummedClampedWaveforms::default());
    g.with(
        "verify_summary",
        move |s: &SummedClampedWaveforms| record((s.size, s.sum)),
        Concurrency::Serial,
    )
    .observe("summed_waveforms");

    let recorder = g.make(SpillRecorder::default());
    let handle = recorder.handle();
    recorder.output_with("save", SpillRecorder::save, Concurrency::Serial);

    let summary = g.execute().await.expect("runs");
    assert_eq!(summary.execution_count("wave_gen"), 1);
    assert_eq!(summary.execution_count("clamp"), 4);
    assert_eq!(summary.execution_count("accum_for_spill"), 4);
    assert_eq!(summary.execution_count("verify_summary"), 1);

    // Values above the clamp ceiling collapse to 10.0.
    assert_eq!(collected(&summaries), vec![(1000, 10_000.0)]);

    // The sink hears each chunk from the unfold and the clamp, and the
    // spill itself exactly once, at the fold commit.
    assert_eq!(handle.saved_at("spill"), 1);
    assert_eq!(handle.saved_at("APA"), 8);
    assert_eq!(summary.execution_count("save"), 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn predicate_gates_its_consumer() {
    let source = |out: Yielder| async move {
        let job = ProductStore::base("test");
        out.yield_store(job.clone()).await?;
        for e in 0..5usize {
            let event = job.make_child(e, "event", "test");
            event.add_product("number", e as i64)?;
            out.yield_store(event).await?;
        }
        Ok(())
    };

    let (seen, record) = collector::<i64>();
    let mut g = FlowGraph::new(source);
    g.with("even?", |n: &i64| n % 2 == 0, Concurrency::Unlimited)
        .filter("number");
    g.with("record", move |n: &i64| record(*n), Concurrency::Serial)
        .when("even?")
        .observe("number");

    let summary = g.execute().await.expect("runs");
    assert_eq!(summary.execution_count("even?"), 5);
    assert_eq!(summary.execution_count("record"), 3);

    let mut values = collected(&seen);
    values.sort_unstable();
    assert_eq!(values, vec![0, 2, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_cap_bounds_in_flight_kernels() {
    let source = |out: Yielder| async move {
        let job = ProductStore::base("test");
        out.yield_store(job.clone()).await?;
        for e in 0..100usize {
            let event = job.make_child(e, "event", "test");
            event.add_product("value", e as i64)?;
            out.yield_store(event).await?;
        }
        Ok(())
    };

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_observed = Arc::new(AtomicUsize::new(0));
    let gauge = in_flight.clone();
    let high_water = max_observed.clone();

    let mut g = FlowGraph::new(source);
    g.with(
        "squeeze",
        move |v: &i64| {
            let now = gauge.fetch_add(1, Ordering::SeqCst) + 1;
            high_water.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(1));
            gauge.fetch_sub(1, Ordering::SeqCst);
            *v
        },
        Concurrency::Max(2),
    )
    .transform("value")
    .to("out");
    g.with("count", |_: &i64| {}, Concurrency::Unlimited)
        .observe("out");

    let summary = g.execute().await.expect("runs");
    assert_eq!(summary.execution_count("squeeze"), 100);
    assert_eq!(summary.execution_count("count"), 100);
    assert!(
        max_observed.load(Ordering::SeqCst) <= 2,
        "cap exceeded: {}",
        max_observed.load(Ordering::SeqCst)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn kernel_panic_drains_and_surfaces_the_error() {
    let source = |out: Yielder| async move {
        let job = ProductStore::base("test");
        out.yield_store(job.clone()).await?;
        for e in 0..100usize {
            let event = job.make_child(e, "event", "test");
            event.add_product("number", e as i64)?;
            out.yield_store(event).await?;
        }
        Ok(())
    };

    let mut g = FlowGraph::new(source);
    g.with(
        "explode",
        |n: &i64| {
            if *n == 50 {
                panic!("kernel rejected value 50");
            }
            *n
        },
        Concurrency::Serial,
    )
    .transform("number")
    .to("passed");
    g.with("downstream", |_: &i64| {}, Concurrency::Serial)
        .observe("passed");

    let error = g.execute().await.expect_err("panic is fatal");
    match &error {
        FrameworkError::Runtime(RuntimeError::KernelPanicked { node, detail }) => {
            assert_eq!(node, "explode");
            assert!(detail.contains("rejected value 50"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn downstream_work_is_dropped_after_a_fatal_error() {
    let source = |out: Yielder| async move {
        let job = ProductStore::base("test");
        out.yield_store(job.clone()).await?;
        for e in 0..100usize {
            let event = job.make_child(e, "event", "test");
            event.add_product("number", e as i64)?;
            out.yield_store(event).await?;
        }
        Ok(())
    };

    let downstream_runs = Arc::new(AtomicUsize::new(0));
    let counter = downstream_runs.clone();

    let mut g = FlowGraph::new(source);
    g.with(
        "explode",
        |n: &i64| {
            if *n == 50 {
                panic!("boom");
            }
            *n
        },
        Concurrency::Serial,
    )
    .transform("number")
    .to("passed");
    g.with(
        "downstream",
        move |_: &i64| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        Concurrency::Serial,
    )
    .observe("passed");

    assert!(g.execute().await.is_err());
    // The failing transform stopped at its 51st message, so at most 50
    // outputs ever existed for the observer.
    assert!(downstream_runs.load(Ordering::SeqCst) <= 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn source_failures_surface_verbatim() {
    let source = |out: Yielder| async move {
        let job = ProductStore::base("test");
        out.yield_store(job.clone()).await?;
        anyhow::bail!("tape unreadable at record 7");
    };

    let mut g = FlowGraph::new(source);
    g.with("record", |_: &i64| {}, Concurrency::Serial)
        .observe("number");

    let error = g.execute().await.expect_err("source failure is fatal");
    assert!(error.to_string().contains("tape unreadable at record 7"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn zero_input_fold_commits_its_initializer_once() {
    let source = |out: Yielder| async move {
        let job = ProductStore::base("test");
        out.yield_store(job.clone()).await?;
        // One run opens and closes without a single event.
        out.yield_store(job.make_child(0, "run", "test")).await?;
        Ok(())
    };

    let (seen, record) = collector::<i64>();
    let mut g = FlowGraph::new(source);
    g.with("add", |sum: &mut i64, n: &i64| *sum += n, Concurrency::Unlimited)
        .fold("number")
        .partitioned_by("run")
        .to("run_sum")
        .initialized_with(42i64);
    g.with("verify", move |s: &i64| record(*s), Concurrency::Serial)
        .observe("run_sum");

    let summary = g.execute().await.expect("runs");
    assert_eq!(summary.execution_count("add"), 0);
    assert_eq!(summary.execution_count("verify"), 1);
    assert_eq!(collected(&seen), vec![42]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gated_folds_that_drop_inputs_are_flagged_as_inconsistent() {
    let source = |out: Yielder| async move {
        let job = ProductStore::base("test");
        out.yield_store(job.clone()).await?;
        for e in 0..5usize {
            let event = job.make_child(e, "event", "test");
            event.add_product("number", e as i64)?;
            out.yield_store(event).await?;
        }
        Ok(())
    };

    let mut g = FlowGraph::new(source);
    g.with("even?", |n: &i64| n % 2 == 0, Concurrency::Unlimited)
        .filter("number");
    g.with("add", |sum: &mut i64, n: &i64| *sum += n, Concurrency::Unlimited)
        .when("even?")
        .fold("number")
        .partitioned_by("job")
        .to("sum")
        .initialized_with(0i64);

    let error = g.execute().await.expect_err("miscount is fatal");
    match error {
        FrameworkError::Runtime(RuntimeError::InconsistentFlush {
            expected, actual, ..
        }) => {
            assert_eq!(expected, 5);
            assert_eq!(actual, 3);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_stores_for_one_identifier_are_fatal() {
    let source = |out: Yielder| async move {
        let job = ProductStore::base("test");
        out.yield_store(job.clone()).await?;
        out.yield_store(job.make_child(0, "event", "first")).await?;
        out.yield_store(job.make_child(0, "event", "second")).await?;
        Ok(())
    };

    let mut g = FlowGraph::new(source);
    g.with("record", |_: &i64| {}, Concurrency::Serial)
        .observe("number");

    let error = g.execute().await.expect_err("duplicate id is fatal");
    assert!(matches!(
        error,
        FrameworkError::Runtime(RuntimeError::DuplicateStore { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stores_with_unseen_parents_are_fatal_and_mint_no_flush() {
    let source = |out: Yielder| async move {
        let job = ProductStore::base("test");
        out.yield_store(job.clone()).await?;
        let run = job.make_child(0, "run", "test");
        // The run itself is never yielded.
        out.yield_store(run.make_child(0, "event", "test")).await?;
        Ok(())
    };

    // A job-partitioned fold would commit its initializer (and fire the
    // observer) on any job-level flush; rejecting the orphan must not
    // close the job.
    let commits = Arc::new(AtomicUsize::new(0));
    let counter = commits.clone();

    let mut g = FlowGraph::new(source);
    g.with("add", |sum: &mut i64, n: &i64| *sum += n, Concurrency::Unlimited)
        .fold("number")
        .partitioned_by("job")
        .to("sum")
        .initialized_with(0i64);
    g.with(
        "record",
        move |_: &i64| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        Concurrency::Serial,
    )
    .observe("sum");

    let error = g.execute().await.expect_err("orphan is fatal");
    assert!(matches!(
        error,
        FrameworkError::Runtime(RuntimeError::OrphanStore { .. })
    ));
    assert_eq!(commits.load(Ordering::SeqCst), 0, "no flush may precede the rejection");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registration_errors_block_execution() {
    let mut g = FlowGraph::new(|_out: Yielder| async { Ok(()) });
    g.with("add", |a: &i64, b: &i64| a + b, Concurrency::Serial)
        .transform("lonely")
        .to("sum");

    let error = g.execute().await.expect_err("bad arity refuses to start");
    let errors = error.registration_errors().expect("registration failure");
    assert_eq!(errors.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn graph_export_writes_during_execute() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("pipeline.dot");

    let mut g = FlowGraph::new(|_out: Yielder| async { Ok(()) });
    g.with("square", |n: &i64| n * n, Concurrency::Unlimited)
        .transform("number")
        .to("squared");
    g.export_graph(&path);

    g.execute().await.expect("runs");
    let text = std::fs::read_to_string(&path).expect("dot written");
    assert!(text.contains("\"square\""));
}
