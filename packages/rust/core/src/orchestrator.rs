//! Concurrent fan-out of one query to every classified source.
//!
//! Each selected source runs as its own task; all tasks are joined, their
//! outcomes folded into [`SourceResult`]s, sorted into canonical order and
//! persisted. Dispatch itself never fails: every adapter error, panic or
//! cancellation ends up as a result record.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Instant;

use tokio::task::{Id, JoinSet};
use tracing::{debug, info, instrument, warn};

use sourcerouter_adapters::{AdapterResult, AdapterSet, FetchRequest};
use sourcerouter_shared::{
    Classification, CombinedResult, SlideTarget, SlidesConfig, Source, SourceResult,
};

use crate::logger::ResultLogger;

pub const NO_ADAPTER_MESSAGE: &str = "no adapter registered";
pub const CANCELLED_MESSAGE: &str = "cancelled before completion";

/// Progress callbacks fired while a dispatch runs.
pub trait DispatchObserver: Send + Sync {
    /// A source's task was spawned.
    fn source_started(&self, source: Source);
    /// A source reached its terminal state.
    fn source_finished(&self, result: &SourceResult);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl DispatchObserver for SilentObserver {
    fn source_started(&self, _source: Source) {}
    fn source_finished(&self, _result: &SourceResult) {}
}

/// Dispatches classified queries to injected adapters.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    adapters: AdapterSet,
    slides: SlidesConfig,
    logger: ResultLogger,
}

impl Orchestrator {
    pub fn new(adapters: AdapterSet, slides: SlidesConfig, logger: ResultLogger) -> Self {
        Self {
            adapters,
            slides,
            logger,
        }
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    pub fn logger(&self) -> &ResultLogger {
        &self.logger
    }

    /// Deck analysed for `target`; unmapped or absent targets use the default deck.
    pub fn deck_for(&self, target: Option<SlideTarget>) -> &str {
        target
            .and_then(|t| self.slides.deck_for(t))
            .unwrap_or(&self.slides.default_deck)
    }

    /// Run every selected source to completion.
    pub async fn dispatch(&self, classification: &Classification, query: &str) -> CombinedResult {
        self.dispatch_until(classification, query, std::future::pending(), &SilentObserver)
            .await
    }

    /// Like [`dispatch`](Self::dispatch), but stops early when `cancel`
    /// resolves. Finished results are kept; unfinished sources are failed.
    #[instrument(skip_all, fields(sources = classification.sources().len(), mode = ?classification.mode()))]
    pub async fn dispatch_until<F>(
        &self,
        classification: &Classification,
        query: &str,
        cancel: F,
        observer: &dyn DispatchObserver,
    ) -> CombinedResult
    where
        F: Future<Output = ()>,
    {
        if classification.sources().is_empty() {
            info!("no sources selected");
            let result = SourceResult::no_source();
            observer.source_finished(&result);
            return self.finish(query, vec![result], false).await;
        }

        let mut results = Vec::with_capacity(classification.sources().len());
        let mut tasks = JoinSet::new();
        let mut running: HashMap<Id, Source> = HashMap::new();

        for &source in classification.sources() {
            let Some(adapter) = self.adapters.get(source) else {
                warn!(%source, "selected source has no adapter");
                let result = self.qualify(
                    SourceResult::failed(source, NO_ADAPTER_MESSAGE),
                    classification,
                );
                observer.source_finished(&result);
                results.push(result);
                continue;
            };

            let request = self.request_for(source, classification, query);
            observer.source_started(source);
            debug!(%source, adapter = adapter.name(), "spawning fetch");

            let handle = tasks.spawn(async move {
                let started = Instant::now();
                let outcome = adapter.fetch(&request).await;
                (outcome, started.elapsed().as_millis() as u64)
            });
            running.insert(handle.id(), source);
        }

        tokio::pin!(cancel);
        let cancelled = loop {
            tokio::select! {
                biased;
                () = &mut cancel => break true,
                joined = tasks.join_next_with_id() => {
                    let Some(joined) = joined else { break false };
                    let (id, result) = match joined {
                        Ok((id, (outcome, elapsed_ms))) => {
                            let source = running[&id];
                            (id, settle(source, outcome).with_elapsed_ms(elapsed_ms))
                        }
                        Err(err) => {
                            let id = err.id();
                            let source = running[&id];
                            warn!(%source, error = %err, "adapter task did not complete");
                            (id, SourceResult::failed(source, join_failure(err)))
                        }
                    };
                    running.remove(&id);
                    let result = self.qualify(result, classification);
                    observer.source_finished(&result);
                    results.push(result);
                }
            }
        };

        if cancelled {
            tasks.abort_all();
            let unfinished: BTreeSet<Source> = running.into_values().collect();
            info!(unfinished = unfinished.len(), "dispatch cancelled");
            for source in unfinished {
                let result =
                    self.qualify(SourceResult::failed(source, CANCELLED_MESSAGE), classification);
                observer.source_finished(&result);
                results.push(result);
            }
        }

        self.finish(query, results, cancelled).await
    }

    fn request_for(&self, source: Source, classification: &Classification, query: &str) -> FetchRequest {
        let request = FetchRequest::new(query, classification.mode());
        match source {
            Source::Slides => {
                let target = classification.slide_target();
                request.with_deck(self.deck_for(target), target)
            }
            _ => request,
        }
    }

    /// Slides results name the deck they analysed.
    fn qualify(&self, result: SourceResult, classification: &Classification) -> SourceResult {
        if result.source() != Some(Source::Slides) {
            return result;
        }
        match classification.slide_target() {
            Some(target) => result.with_detail(target.to_string()),
            None => result.with_detail("default"),
        }
    }

    async fn finish(&self, query: &str, results: Vec<SourceResult>, cancelled: bool) -> CombinedResult {
        let combined = CombinedResult::new(query, results, cancelled);
        info!(run_id = %combined.run_id(), cancelled, "dispatch complete");
        for line in combined.summary_log() {
            info!(run_id = %combined.run_id(), "{line}");
        }
        match self.logger.persist(&combined).await {
            Some(path) => combined.with_log_path(path),
            None => combined,
        }
    }
}

/// Fold an adapter outcome into a result record.
fn settle(source: Source, outcome: AdapterResult<String>) -> SourceResult {
    match outcome {
        Ok(content) => SourceResult::ok(source, content),
        Err(e) if e.is_soft() => {
            debug!(%source, notice = e.message(), "adapter answered with a notice");
            SourceResult::degraded(source, e.message())
        }
        Err(e) => {
            warn!(%source, error = %e, "adapter failed");
            SourceResult::failed(source, e.message())
        }
    }
}

fn join_failure(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("adapter panicked: {message}")
}
