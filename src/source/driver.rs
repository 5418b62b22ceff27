// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The suspendable producer that feeds the graph.
//!
//! A source is written as straight-line async code that calls
//! `yield_store` at each emission point. The driver runs that body as a
//! cooperative task over a rendezvous (capacity-one) channel: `yield_store`
//! suspends the producer until the scheduler asks for the next store, no
//! operating-system thread is pinned while either side waits, and any
//! worker may resume either side. When the body returns, subsequent
//! `next()` calls return `None`; a failure in the body is captured and
//! surfaced on the call that observes the end of the stream.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::RuntimeError;
use crate::model::ProductStore;

/// Handed to the producer body; each call suspends the producer until the
/// consumer takes the store.
pub struct Yielder {
    tx: mpsc::Sender<Arc<ProductStore>>,
}

impl Yielder {
    /// Emits one store into the graph.
    ///
    /// Fails only when the consumer is gone (the graph is shutting down);
    /// the producer should propagate that and stop.
    pub async fn yield_store(&self, store: Arc<ProductStore>) -> anyhow::Result<()> {
        self.tx
            .send(store)
            .await
            .map_err(|_| anyhow::anyhow!("graph stopped consuming the source"))
    }
}

/// A source plugin: a producer whose body yields stores until done.
#[async_trait]
pub trait Source: Send + Sync {
    async fn produce(&self, out: Yielder) -> anyhow::Result<()>;
}

type BoxedSourceFn =
    Box<dyn FnOnce(Yielder) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send>;

/// How the graph was given its source.
pub(crate) enum SourceSpec {
    /// A closure over a `Yielder`.
    Task(BoxedSourceFn),
    /// A boxed source plugin object.
    Object(Box<dyn Source>),
    /// Exactly one store.
    Once(Arc<ProductStore>),
}

/// Conversion into a source specification, implemented for async closures
/// over a `Yielder`. Boxed `Source` objects go through
/// `FlowGraph::from_source` instead, which keeps this blanket
/// implementation unambiguous.
pub trait IntoSource {
    fn into_source(self) -> SourceSpec;
}

impl<F, Fut> IntoSource for F
where
    F: FnOnce(Yielder) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn into_source(self) -> SourceSpec {
        SourceSpec::Task(Box::new(move |out| Box::pin(self(out))))
    }
}

/// Pulls stores out of the producer one at a time.
///
/// The producer task is spawned lazily on the first `next()` call; after
/// `next()` returns `None`, `finish()` reports how the body ended.
pub(crate) struct SourceDriver {
    spec: Option<SourceSpec>,
    rx: Option<mpsc::Receiver<Arc<ProductStore>>>,
    handle: Option<JoinHandle<anyhow::Result<()>>>,
}

impl SourceDriver {
    pub fn new(spec: SourceSpec) -> Self {
        SourceDriver {
            spec: Some(spec),
            rx: None,
            handle: None,
        }
    }

    /// The next store, or `None` once the producer body has returned.
    pub async fn next(&mut self) -> Option<Arc<ProductStore>> {
        if let Some(spec) = self.spec.take() {
            self.start(spec);
        }
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    fn start(&mut self, spec: SourceSpec) {
        let (tx, rx) = mpsc::channel(1);
        self.rx = Some(rx);
        match spec {
            SourceSpec::Task(body) => {
                let out = Yielder { tx };
                self.handle = Some(tokio::spawn(body(out)));
            }
            SourceSpec::Object(object) => {
                let out = Yielder { tx };
                self.handle =
                    Some(tokio::spawn(async move { object.produce(out).await }));
            }
            SourceSpec::Once(store) => {
                let out = Yielder { tx };
                self.handle = Some(tokio::spawn(async move {
                    out.yield_store(store).await?;
                    Ok(())
                }));
            }
        }
    }

    /// Tears the producer down and reports how it ended. Closing the
    /// channel first unblocks a producer still waiting to yield.
    pub async fn finish(&mut self) -> Result<(), RuntimeError> {
        self.rx = None;
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(RuntimeError::SourceFailed {
                detail: format!("{:#}", error),
            }),
            Err(join_error) => Err(RuntimeError::SourceFailed {
                detail: format!("producer panicked: {}", join_error),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn yields_stores_in_order_then_ends() {
        let source = |out: Yielder| async move {
            let job = ProductStore::base("test");
            out.yield_store(job.clone()).await?;
            for i in 0..3 {
                out.yield_store(job.make_child(i, "event", "test")).await?;
            }
            Ok(())
        };
        let mut driver = SourceDriver::new(source.into_source());

        let mut seen = Vec::new();
        while let Some(store) = driver.next().await {
            seen.push(store.id().to_string());
        }
        assert_eq!(seen, vec!["job", "job/event:0", "job/event:1", "job/event:2"]);
        assert!(driver.finish().await.is_ok());
        assert!(driver.next().await.is_none());
    }

    #[tokio::test]
    async fn producer_failure_is_captured_and_reported() {
        let source = |out: Yielder| async move {
            out.yield_store(ProductStore::base("test")).await?;
            anyhow::bail!("tape unreadable");
        };
        let mut driver = SourceDriver::new(source.into_source());

        assert!(driver.next().await.is_some());
        assert!(driver.next().await.is_none());
        let err = driver.finish().await.unwrap_err();
        assert!(matches!(err, RuntimeError::SourceFailed { .. }));
        assert!(err.to_string().contains("tape unreadable"));
    }

    #[tokio::test]
    async fn producer_panic_is_captured() {
        let source = |_out: Yielder| async move {
            if true {
                panic!("boom");
            }
            Ok(())
        };
        let mut driver = SourceDriver::new(source.into_source());

        assert!(driver.next().await.is_none());
        let err = driver.finish().await.unwrap_err();
        assert!(matches!(err, RuntimeError::SourceFailed { .. }));
    }

    #[tokio::test]
    async fn abandoned_consumer_unblocks_the_producer() {
        let source = |out: Yielder| async move {
            let job = ProductStore::base("test");
            loop {
                out.yield_store(job.clone()).await?;
            }
        };
        let mut driver = SourceDriver::new(source.into_source());

        assert!(driver.next().await.is_some());
        // Dropping the receiver inside finish() must end the infinite
        // producer rather than hanging.
        let err = driver.finish().await.unwrap_err();
        assert!(matches!(err, RuntimeError::SourceFailed { .. }));
    }

    struct CountedSource {
        events: usize,
    }

    #[async_trait]
    impl Source for CountedSource {
        async fn produce(&self, out: Yielder) -> anyhow::Result<()> {
            let job = ProductStore::base("counted");
            out.yield_store(job.clone()).await?;
            for i in 0..self.events {
                let event = job.make_child(i, "event", "counted");
                event.add_product("number", i as i64)?;
                out.yield_store(event).await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn boxed_source_objects_drive_the_same_way() {
        let source: Box<dyn Source> = Box::new(CountedSource { events: 2 });
        let mut driver = SourceDriver::new(SourceSpec::Object(source));

        let mut count = 0;
        while driver.next().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert!(driver.finish().await.is_ok());
    }
}
