//! Shared state of one engine instance
//!
//! Everything a worker may touch lives here and is passed by reference;
//! there are no process-wide singletons.

use crate::clock::{Clock, TokioClock};
use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventBus, EventSink, NullSink};
use crate::repository::{InMemoryRepository, Repository};
use crate::review::{ReviewItem, ReviewQueue};
use aee_atom::{AtomId, AtomStore, RetryAttempt, RunId};
use aee_validation::ValidationResult;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct EngineContext {
    run_id: RunId,
    config: EngineConfig,
    store: Arc<AtomStore>,
    review: ReviewQueue,
    events: EventBus,
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    cancel: RwLock<CancellationToken>,
    persistence_failures: AtomicUsize,
}

impl EngineContext {
    /// Context with an in-memory repository, real time and no event sink
    #[must_use]
    pub fn new(config: EngineConfig, store: Arc<AtomStore>) -> Self {
        Self {
            run_id: RunId::new(),
            config,
            store,
            review: ReviewQueue::new(),
            events: EventBus::new(Arc::new(NullSink)),
            repository: Arc::new(InMemoryRepository::new()),
            clock: Arc::new(TokioClock),
            cancel: RwLock::new(CancellationToken::new()),
            persistence_failures: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = EventBus::new(sink);
        self
    }

    #[must_use]
    pub fn with_repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = repository;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<AtomStore> {
        &self.store
    }

    #[inline]
    #[must_use]
    pub fn review_queue(&self) -> &ReviewQueue {
        &self.review
    }

    #[inline]
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    #[inline]
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Publish a lifecycle event
    pub fn emit(&self, event: EngineEvent) {
        self.events.publish(self.run_id, event);
    }

    #[must_use]
    pub fn last_event_seq(&self) -> u64 {
        self.events.last_seq()
    }

    /// Request cancellation of the current run
    pub fn cancel(&self) {
        self.cancel.read().cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.read().is_cancelled()
    }

    /// Token observed by in-flight attempts
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.read().clone()
    }

    /// Arm a fresh token so a cancelled run can be resumed
    pub fn reset_cancellation(&self) {
        let mut token = self.cancel.write();
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    /// Writes that failed so far
    #[must_use]
    pub fn persistence_failures(&self) -> usize {
        self.persistence_failures.load(Ordering::Relaxed)
    }

    /// Write the current snapshot of an atom through to the repository
    pub async fn persist_atom(&self, id: &AtomId) {
        let Some(atom) = self.store.get(id) else {
            return;
        };
        if let Err(err) = self.repository.save_atom(&atom).await {
            self.persistence_failed("atom", &err);
        }
    }

    pub async fn persist_attempt(&self, attempt: &RetryAttempt) {
        if let Err(err) = self.repository.append_attempt(attempt).await {
            self.persistence_failed("attempt", &err);
        }
    }

    pub async fn persist_validation(&self, result: &ValidationResult) {
        if let Err(err) = self.repository.save_validation(result).await {
            self.persistence_failed("validation", &err);
        }
    }

    pub async fn persist_review(&self, item: &ReviewItem) {
        if let Err(err) = self.repository.save_review(item).await {
            self.persistence_failed("review", &err);
        }
    }

    fn persistence_failed(&self, record: &'static str, err: &dyn std::fmt::Display) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(run_id = %self.run_id, record, error = %err, "persistence write failed");
    }
}
