//! Shared test runners for the scenario integration tests.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use runner_dispatch::prelude::*;

/// A runner that sleeps `delay` before appending a single match, used to
/// exercise the scheduler's throttled emission.
pub struct DelayRunner {
    metadata: RunnerMetadata,
    delay: Duration,
    self_handle: Mutex<Option<Weak<dyn Runner>>>,
}

impl DelayRunner {
    pub fn new(id: &str, delay: Duration) -> Arc<dyn Runner> {
        let runner: Arc<dyn Runner> = Arc::new(Self {
            metadata: RunnerMetadata::new(id, id),
            delay,
            self_handle: Mutex::new(None),
        });
        runner.attach_self(Arc::downgrade(&runner));
        runner
    }
}

impl Runner for DelayRunner {
    fn metadata(&self) -> &RunnerMetadata {
        &self.metadata
    }
    fn match_query(&self, context: &RunnerContext) {
        std::thread::sleep(self.delay);
        if let Some(self_arc) = self.self_handle.lock().as_ref().and_then(Weak::upgrade) {
            context.add_match(QueryMatchBuilder::new(&self_arc, "only", "hit").build());
        }
    }
    fn run(&self, _context: &RunnerContext, _m: &QueryMatch, _action: Option<&Action>) -> bool {
        true
    }
    fn attach_self(&self, handle: Weak<dyn Runner>) {
        *self.self_handle.lock() = Some(handle);
    }
}

/// A runner with `unique_results`/`weak_results` configurable, appending a
/// single match with a fixed local id after an optional delay — used for the
/// de-dup scenario.
pub struct SingleMatchRunner {
    metadata: RunnerMetadata,
    local_id: &'static str,
    text: &'static str,
    delay: Duration,
    self_handle: Mutex<Option<Weak<dyn Runner>>>,
}

impl SingleMatchRunner {
    pub fn new(id: &str, local_id: &'static str, text: &'static str, weak_results: bool, delay: Duration) -> Arc<dyn Runner> {
        let mut metadata = RunnerMetadata::new(id, id);
        metadata.unique_results = true;
        metadata.weak_results = weak_results;
        let runner: Arc<dyn Runner> = Arc::new(Self {
            metadata,
            local_id,
            text,
            delay,
            self_handle: Mutex::new(None),
        });
        runner.attach_self(Arc::downgrade(&runner));
        runner
    }
}

impl Runner for SingleMatchRunner {
    fn metadata(&self) -> &RunnerMetadata {
        &self.metadata
    }
    fn match_query(&self, context: &RunnerContext) {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some(self_arc) = self.self_handle.lock().as_ref().and_then(Weak::upgrade) {
            context.add_match(QueryMatchBuilder::new(&self_arc, self.local_id, self.text).build());
        }
    }
    fn run(&self, _context: &RunnerContext, _m: &QueryMatch, _action: Option<&Action>) -> bool {
        true
    }
    fn attach_self(&self, handle: Weak<dyn Runner>) {
        *self.self_handle.lock() = Some(handle);
    }
}

/// A runner producing one match per call, named after the query text —
/// used to drive history/run-activation scenarios.
pub struct EchoRunner {
    metadata: RunnerMetadata,
    self_handle: Mutex<Option<Weak<dyn Runner>>>,
}

impl EchoRunner {
    pub fn new(id: &str) -> Arc<dyn Runner> {
        let runner: Arc<dyn Runner> = Arc::new(Self {
            metadata: RunnerMetadata::new(id, id),
            self_handle: Mutex::new(None),
        });
        runner.attach_self(Arc::downgrade(&runner));
        runner
    }

    pub fn gated(id: &str, min_letter_count: usize) -> Arc<dyn Runner> {
        let mut metadata = RunnerMetadata::new(id, id);
        metadata.min_letter_count = min_letter_count;
        let runner: Arc<dyn Runner> = Arc::new(Self {
            metadata,
            self_handle: Mutex::new(None),
        });
        runner.attach_self(Arc::downgrade(&runner));
        runner
    }
}

impl Runner for EchoRunner {
    fn metadata(&self) -> &RunnerMetadata {
        &self.metadata
    }
    fn match_query(&self, context: &RunnerContext) {
        if let Some(self_arc) = self.self_handle.lock().as_ref().and_then(Weak::upgrade) {
            context.add_match(QueryMatchBuilder::new(&self_arc, context.query(), context.query()).build());
        }
    }
    fn run(&self, _context: &RunnerContext, _m: &QueryMatch, _action: Option<&Action>) -> bool {
        true
    }
    fn attach_self(&self, handle: Weak<dyn Runner>) {
        *self.self_handle.lock() = Some(handle);
    }
}

/// A runner producing two fixed-relevance matches with `unique_results`, for
/// the history-boost scenario.
pub struct TwoMatchRunner {
    metadata: RunnerMetadata,
    self_handle: Mutex<Option<Weak<dyn Runner>>>,
}

impl TwoMatchRunner {
    pub fn new(id: &str) -> Arc<dyn Runner> {
        let mut metadata = RunnerMetadata::new(id, id);
        metadata.unique_results = true;
        let runner: Arc<dyn Runner> = Arc::new(Self {
            metadata,
            self_handle: Mutex::new(None),
        });
        runner.attach_self(Arc::downgrade(&runner));
        runner
    }
}

impl Runner for TwoMatchRunner {
    fn metadata(&self) -> &RunnerMetadata {
        &self.metadata
    }
    fn match_query(&self, context: &RunnerContext) {
        if let Some(self_arc) = self.self_handle.lock().as_ref().and_then(Weak::upgrade) {
            context.add_match(QueryMatchBuilder::new(&self_arc, "foo", "foo").relevance(0.1).build());
            context.add_match(QueryMatchBuilder::new(&self_arc, "bar", "bar").relevance(0.2).build());
        }
    }
    fn run(&self, _context: &RunnerContext, _m: &QueryMatch, _action: Option<&Action>) -> bool {
        true
    }
    fn attach_self(&self, handle: Weak<dyn Runner>) {
        *self.self_handle.lock() = Some(handle);
    }
}

pub fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap()
}

/// Builds a [`RunnerManager`] over a fresh in-memory history store, leaking
/// the backing runtime for the test's lifetime.
pub fn manager_with(history_change_threshold: u32) -> Arc<RunnerManager> {
    let runtime = rt();
    let history = HistoryStore::new(Box::new(InMemoryConfigGroup::default()), "test-env", history_change_threshold);
    let manager = RunnerManager::new(runtime.handle().clone(), history);
    std::mem::forget(runtime);
    manager
}

/// Drains `rx` of whatever is already queued, returning the last value —
/// used after a `query_finished` receipt to read the final `matches_changed`
/// payload regardless of how many throttled emissions preceded it.
pub fn last_queued<T>(rx: &kanal::Receiver<T>) -> T {
    let mut last = rx.recv().expect("at least one matches_changed emission");
    while let Ok(Some(next)) = rx.try_recv() {
        last = next;
    }
    last
}
