//! [`RunnerContext`]: the per-query shared state every runner writes
//! matches into.
//!
//! An `RwLock`-guarded match list plus a de-dup map, wrapped in a
//! cheaply-clonable `Arc` handle so the façade and every in-flight job can
//! hold a reference to the same generation of the context without
//! synchronizing on anything but the lock around the match list itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::match_item::QueryMatch;

#[derive(Default)]
struct MatchesInner {
    matches: Vec<QueryMatch>,
    by_id: HashMap<String, usize>,
}

/// A request, raised by a runner during `match_query`, that the host
/// rewrite the visible query string (e.g. a calculator expanding `=` to a
/// canonical expression).
#[derive(Debug, Clone)]
pub struct RequestedQueryUpdate {
    /// The new query text.
    pub text: String,
    /// Where the cursor should land in `text`.
    pub cursor: usize,
}

/// Per-query shared state. Cheaply clonable; clones refer to the same
/// underlying generation of the query.
#[derive(Clone)]
pub struct RunnerContext {
    inner: Arc<Inner>,
}

struct Inner {
    query: String,
    single_runner_mode: bool,
    valid: AtomicBool,
    ignore_for_history: AtomicBool,
    requested_query_update: Mutex<Option<RequestedQueryUpdate>>,
    job_start_ts: Instant,
    matches: RwLock<MatchesInner>,
    dirty_tx: Option<kanal::Sender<()>>,
}

impl RunnerContext {
    /// Creates a fresh context for `query`. `dirty_tx`, if given, receives a
    /// notification every time a match is successfully added — the
    /// scheduler listens on this to drive the throttled `matches_changed`
    /// emission.
    pub fn new(query: impl Into<String>, single_runner_mode: bool, dirty_tx: Option<kanal::Sender<()>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                query: query.into(),
                single_runner_mode,
                valid: AtomicBool::new(true),
                ignore_for_history: AtomicBool::new(false),
                requested_query_update: Mutex::new(None),
                job_start_ts: Instant::now(),
                matches: RwLock::new(MatchesInner::default()),
                dirty_tx,
            }),
        }
    }

    /// The query text this context was created for.
    pub fn query(&self) -> &str {
        &self.inner.query
    }

    /// Whether this context is still the current one. Runners should poll
    /// this in long inner loops and return promptly once it flips to
    /// `false` — invalidation never un-happens for a given context
    /// generation.
    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    /// Marks this context invalid. Idempotent. Called exactly once, by
    /// whichever code creates the next generation's context.
    pub fn invalidate(&self) {
        self.inner.valid.store(false, Ordering::Release);
    }

    /// Whether matches are being gathered for exactly one runner: gates
    /// are bypassed in this mode.
    pub fn single_runner_mode(&self) -> bool {
        self.inner.single_runner_mode
    }

    /// When set by a runner during `run()`/`match_query`, the manager will
    /// not record this query in history.
    pub fn set_ignore_for_history(&self, ignore: bool) {
        self.inner.ignore_for_history.store(ignore, Ordering::Relaxed);
    }

    /// See [`Self::set_ignore_for_history`].
    pub fn ignore_for_history(&self) -> bool {
        self.inner.ignore_for_history.load(Ordering::Relaxed)
    }

    /// A runner may ask the host to rewrite the query string displayed to
    /// the user; this records that request for the façade to proxy as
    /// `request_update_query_string`.
    pub fn request_query_update(&self, text: impl Into<String>, cursor: usize) {
        *self.inner.requested_query_update.lock() = Some(RequestedQueryUpdate { text: text.into(), cursor });
    }

    /// Takes (clearing) any pending query-update request.
    pub fn take_requested_query_update(&self) -> Option<RequestedQueryUpdate> {
        self.inner.requested_query_update.lock().take()
    }

    /// When this generation's jobs were started.
    pub fn job_start_ts(&self) -> Instant {
        self.inner.job_start_ts
    }

    /// Appends `m` to the context, applying the de-dup rule:
    ///
    /// - if the producing runner is not `unique_results`, the match is
    ///   always appended, even if its id collides with another match;
    /// - if it is `unique_results` and no match with that id exists yet,
    ///   insert;
    /// - if it is `unique_results` and a match with that id exists, replace
    ///   it only if the *incumbent's* runner is `weak_results`, otherwise
    ///   keep the incumbent and drop the new match.
    ///
    /// Returns `false` (and does nothing) if the context has already been
    /// invalidated — writes to a cancelled context are silently discarded.
    pub fn add_match(&self, m: QueryMatch) -> bool {
        if !self.is_valid() {
            return false;
        }

        let is_unique = m.runner().is_some_and(|r| r.metadata().unique_results);

        {
            let mut guard = self.inner.matches.write();
            if is_unique {
                if let Some(&incumbent_idx) = guard.by_id.get(m.id()) {
                    let incumbent_is_weak = guard.matches[incumbent_idx]
                        .runner()
                        .is_some_and(|r| r.metadata().weak_results);
                    if incumbent_is_weak {
                        guard.matches[incumbent_idx] = m;
                    }
                    // else: incumbent wins, new match is dropped.
                } else {
                    let idx = guard.matches.len();
                    guard.by_id.insert(m.id().to_string(), idx);
                    guard.matches.push(m);
                }
            } else {
                guard.matches.push(m);
            }
        }

        if let Some(tx) = &self.inner.dirty_tx {
            let _ = tx.send(());
        }
        true
    }

    /// Appends every match in `ms`, returning how many were actually kept
    /// (a dropped duplicate doesn't count).
    pub fn add_matches(&self, ms: impl IntoIterator<Item = QueryMatch>) -> usize {
        let before = self.len();
        for m in ms {
            self.add_match(m);
        }
        self.len().saturating_sub(before)
    }

    /// A point-in-time snapshot of every match currently held, in
    /// insertion order. While `is_valid()`, this list only grows.
    pub fn matches(&self) -> Vec<QueryMatch> {
        self.inner.matches.read().matches.clone()
    }

    /// Number of matches currently held.
    pub fn len(&self) -> usize {
        self.inner.matches.read().matches.len()
    }

    /// Whether any matches have been added yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::action::Action;
    use crate::match_item::QueryMatchBuilder;
    use crate::runner::{Runner, RunnerMetadata};

    struct StubRunner {
        metadata: RunnerMetadata,
    }

    impl Runner for StubRunner {
        fn metadata(&self) -> &RunnerMetadata {
            &self.metadata
        }
        fn match_query(&self, _context: &RunnerContext) {}
        fn run(&self, _context: &RunnerContext, _m: &QueryMatch, _action: Option<&Action>) -> bool {
            true
        }
    }

    fn runner(id: &str, unique: bool, weak: bool) -> Arc<dyn Runner> {
        let mut metadata = RunnerMetadata::new(id, id);
        metadata.unique_results = unique;
        metadata.weak_results = weak;
        Arc::new(StubRunner { metadata })
    }

    #[test]
    fn non_unique_matches_always_append() {
        let ctx = RunnerContext::new("q", false, None);
        let r = runner("a", false, false);
        ctx.add_match(QueryMatchBuilder::new(&r, "x", "one").build());
        ctx.add_match(QueryMatchBuilder::new(&r, "x", "two").build());
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn unique_vs_strong_incumbent_keeps_incumbent() {
        let ctx = RunnerContext::new("q", false, None);
        let strong = runner("a", true, false);
        let other = runner("b", true, true);
        ctx.add_match(QueryMatchBuilder::new(&strong, "x", "first").build());
        ctx.add_match(QueryMatchBuilder::new(&other, "x", "second").build());
        let matches = ctx.matches();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].text(), "first");
    }

    #[test]
    fn unique_vs_weak_incumbent_is_replaced() {
        let ctx = RunnerContext::new("q", false, None);
        let weak = runner("a", true, true);
        let replacement = runner("b", true, false);
        ctx.add_match(QueryMatchBuilder::new(&weak, "x", "first").build());
        ctx.add_match(QueryMatchBuilder::new(&replacement, "x", "second").build());
        let matches = ctx.matches();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].text(), "second");
    }

    #[test]
    fn invalid_context_discards_writes() {
        let ctx = RunnerContext::new("q", false, None);
        ctx.invalidate();
        let r = runner("a", false, false);
        assert!(!ctx.add_match(QueryMatchBuilder::new(&r, "x", "one").build()));
        assert!(ctx.is_empty());
    }
}
