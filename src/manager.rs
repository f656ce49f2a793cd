//! The public façade.
//!
//! Owns the runner registry and the scheduler, translates the host's calls
//! into [`crate::scheduler::Scheduler`] operations, and wires the
//! [`crate::history::HistoryStore`] bonus/record hooks into it. One struct
//! owns everything; `Arc`s are handed to workers.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::action::Action;
use crate::context::RequestedQueryUpdate;
use crate::error::{DispatchError, Result};
use crate::history::HistoryStore;
use crate::match_item::QueryMatch;
use crate::runner::{Runner, RunnerId, RunnerMetadata};
use crate::scheduler::{Scheduler, SessionState};
use crate::store::Favorites;

struct Registry {
    runners: indexmap::IndexMap<RunnerId, Arc<dyn Runner>>,
    allowed: Option<Vec<RunnerId>>,
}

/// Public surface of the crate: loads runners, dispatches queries, and
/// exposes the history store and the scheduler's signals.
pub struct RunnerManager {
    scheduler: Arc<Scheduler>,
    history: Arc<Mutex<HistoryStore>>,
    registry: Mutex<Registry>,
}

impl RunnerManager {
    /// Builds a manager around `handle` (the tokio runtime the scheduler's
    /// timers run on) and `history`, the backing history/launch-count store.
    pub fn new(handle: tokio::runtime::Handle, history: HistoryStore) -> Arc<Self> {
        let scheduler = Scheduler::new(handle);
        let history = Arc::new(Mutex::new(history));

        let bonus_history = Arc::clone(&history);
        scheduler.set_relevance_bonus_fn(Arc::new(move |m: &QueryMatch| bonus_history.lock().bonus_for(m.id())));

        let record_history = Arc::clone(&history);
        scheduler.set_activation_hook(Arc::new(move |context, m| {
            if !context.ignore_for_history() {
                record_history.lock().record_run(context.query(), m.id());
            }
        }));

        Arc::new(Self {
            scheduler,
            history,
            registry: Mutex::new(Registry {
                runners: indexmap::IndexMap::new(),
                allowed: None,
            }),
        })
    }

    /// Loads `runner`, keyed by its own metadata id (idempotent: loading the
    /// same id again replaces the prior instance). Attaches the runner's own
    /// weak self-handle right after it is wrapped in its owning `Arc`.
    pub fn load_runner(&self, runner: Arc<dyn Runner>) -> Arc<dyn Runner> {
        let id = runner.metadata().id.clone();
        runner.attach_self(Arc::downgrade(&runner));
        self.registry.lock().runners.insert(id, Arc::clone(&runner));
        runner
    }

    /// The runner loaded under `id`, if any.
    pub fn runner(&self, id: &str) -> Option<Arc<dyn Runner>> {
        self.registry.lock().runners.get(id).cloned()
    }

    /// Every loaded runner's metadata, in load order.
    pub fn loaded_runners(&self) -> Vec<RunnerMetadata> {
        self.registry.lock().runners.values().map(|r| r.metadata().clone()).collect()
    }

    /// Restricts dispatch to the given runner ids (`None` via
    /// [`Self::clear_allowed_runners`] means "all loaded runners").
    pub fn set_allowed_runners(&self, ids: impl IntoIterator<Item = impl Into<String>>) {
        self.registry.lock().allowed = Some(ids.into_iter().map(Into::into).collect());
    }

    /// Lifts any restriction set by [`Self::set_allowed_runners`].
    pub fn clear_allowed_runners(&self) {
        self.registry.lock().allowed = None;
    }

    /// The current restriction, if any.
    pub fn allowed_runners(&self) -> Option<Vec<RunnerId>> {
        self.registry.lock().allowed.clone()
    }

    /// Replaces the favorites list used for category scoring.
    pub fn set_favorites(&self, favorites: Favorites) {
        self.scheduler.set_favorites(favorites);
    }

    /// Sets the flattened-view limit (`0` = uncapped).
    pub fn set_limit(&self, limit: usize) {
        self.scheduler.set_limit(limit);
    }

    fn selected_runners(&self) -> Vec<Arc<dyn Runner>> {
        let registry = self.registry.lock();
        match &registry.allowed {
            Some(allowed) => allowed.iter().filter_map(|id| registry.runners.get(id).cloned()).collect(),
            None => registry.runners.values().cloned().collect(),
        }
    }

    /// `launch_query(term, runner_id?)`. `runner_id`, when given, restricts
    /// to a single loaded runner and enters single-runner mode (gates
    /// bypassed); an unknown id is an error rather than a silent no-op.
    pub fn launch_query(&self, term: &str, runner_id: Option<&str>) -> Result<()> {
        if let Some(id) = runner_id
            && self.runner(id).is_none()
        {
            return Err(DispatchError::UnknownRunner(id.to_string()));
        }
        let runners = self.selected_runners();
        self.scheduler.launch_query(&runners, term, runner_id);
        Ok(())
    }

    /// `run(match, action?) -> bool`: executes `m`
    /// (recording history unless the runner asked otherwise), deferring if
    /// `m`'s runner has a job in flight for the current generation.
    pub fn run(&self, m: QueryMatch, action: Option<Action>) -> bool {
        let Some(runner) = m.runner() else { return false };
        self.scheduler.run(runner, m, action)
    }

    /// The current, unaggregated match set for the in-flight or most
    /// recently completed query. Hosts wanting the
    /// category-grouped, limited view should consume `matches_changed`
    /// instead, which already applies [`crate::store::MatchStore::flatten`].
    pub fn matches(&self) -> Vec<QueryMatch> {
        self.scheduler.current_context().map(|context| context.matches()).unwrap_or_default()
    }

    /// Subscribes to the `matches_changed(list)` signal.
    pub fn matches_changed(&self) -> kanal::Receiver<Vec<QueryMatch>> {
        self.scheduler.matches_changed()
    }

    /// Subscribes to the `query_finished()` signal.
    pub fn query_finished(&self) -> kanal::Receiver<()> {
        self.scheduler.query_finished()
    }

    /// Subscribes to the `request_update_query_string(text, cursor)` signal.
    pub fn request_update_query_string(&self) -> kanal::Receiver<RequestedQueryUpdate> {
        self.scheduler.request_update_query_string()
    }

    /// History entries, most-recent first.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().entries().to_vec()
    }

    /// Removes the history entry at `index`.
    pub fn remove_from_history(&self, index: usize) {
        self.history.lock().remove(index);
    }

    /// The first history entry starting with `prefix`, if any.
    pub fn history_suggestion(&self, prefix: &str) -> Option<String> {
        self.history.lock().suggest(prefix).map(str::to_string)
    }

    /// Enables or disables history recording.
    pub fn set_history_enabled(&self, enabled: bool) {
        self.history.lock().set_enabled(enabled);
    }

    /// Whether history recording is enabled.
    pub fn history_enabled(&self) -> bool {
        self.history.lock().enabled()
    }

    /// Switches the environment identifier history is recorded/read under.
    pub fn set_history_environment_identifier(&self, environment: impl Into<String>) {
        self.history.lock().set_environment(environment);
    }

    /// `setup_match_session()`: no-op placeholder for hosts
    /// that want to prepare a session without launching a query yet. The
    /// scheduler itself lazily transitions `Idle -> Preparing -> Active` on
    /// the first `launch_query`, so this only exists to give the host an
    /// explicit hook to call before it has a query string ready.
    pub fn setup_match_session(&self) {}

    /// `match_session_complete()`: marks the session
    /// ready to tear down once in-flight jobs drain.
    pub fn match_session_complete(&self) {
        self.scheduler.match_session_complete();
    }

    /// `reset()`: equivalent to launching an empty query,
    /// clearing the current match set without waiting for teardown.
    pub fn reset(&self) {
        let runners = self.selected_runners();
        self.scheduler.launch_query(&runners, "", None);
    }

    /// Current session lifecycle state, mostly useful for tests and hosts
    /// that want to avoid redundant `setup_match_session` calls.
    pub fn session_state(&self) -> SessionState {
        self.scheduler.session_state()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::InMemoryConfigGroup;
    use crate::match_item::QueryMatchBuilder;
    use crate::runner::RunnerMetadata;

    struct EchoRunner {
        metadata: RunnerMetadata,
        self_handle: Mutex<Option<std::sync::Weak<dyn Runner>>>,
        runs: Arc<AtomicUsize>,
    }

    impl Runner for EchoRunner {
        fn metadata(&self) -> &RunnerMetadata {
            &self.metadata
        }
        fn match_query(&self, context: &crate::context::RunnerContext) {
            if let Some(self_arc) = self.self_handle.lock().as_ref().and_then(std::sync::Weak::upgrade) {
                context.add_match(
                    QueryMatchBuilder::new(&self_arc, context.query(), context.query())
                        .relevance(0.1)
                        .build(),
                );
            }
        }
        fn run(&self, _context: &crate::context::RunnerContext, _m: &QueryMatch, _action: Option<&Action>) -> bool {
            self.runs.fetch_add(1, Ordering::SeqCst);
            true
        }
        fn attach_self(&self, handle: std::sync::Weak<dyn Runner>) {
            *self.self_handle.lock() = Some(handle);
        }
    }

    fn rt() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap()
    }

    fn manager() -> Arc<RunnerManager> {
        let runtime = rt();
        let history = HistoryStore::new(Box::new(InMemoryConfigGroup::default()), "test", 1);
        RunnerManager::new(runtime.handle().clone(), history)
    }

    #[test]
    fn unknown_runner_filter_is_an_error() {
        let manager = manager();
        assert!(matches!(manager.launch_query("x", Some("nope")), Err(DispatchError::UnknownRunner(_))));
    }

    #[test]
    fn launch_query_and_run_records_history() {
        let manager = manager();
        let runs = Arc::new(AtomicUsize::new(0));
        let runner: Arc<dyn Runner> = Arc::new(EchoRunner {
            metadata: RunnerMetadata::new("echo", "echo"),
            self_handle: Mutex::new(None),
            runs: runs.clone(),
        });
        manager.load_runner(runner);

        manager.launch_query("hello", None).unwrap();
        let matches = manager.matches_changed().recv().unwrap();
        manager.query_finished().recv().unwrap();
        assert_eq!(matches.len(), 1);

        assert!(manager.run(matches[0].clone(), None));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(manager.history(), vec!["hello".to_string()]);
    }

    #[test]
    fn allowed_runners_restricts_selection() {
        let manager = manager();
        let a: Arc<dyn Runner> = Arc::new(EchoRunner {
            metadata: RunnerMetadata::new("a", "a"),
            self_handle: Mutex::new(None),
            runs: Arc::new(AtomicUsize::new(0)),
        });
        let b: Arc<dyn Runner> = Arc::new(EchoRunner {
            metadata: RunnerMetadata::new("b", "b"),
            self_handle: Mutex::new(None),
            runs: Arc::new(AtomicUsize::new(0)),
        });
        manager.load_runner(a);
        manager.load_runner(b);
        manager.set_allowed_runners(["a"]);

        manager.launch_query("hi", None).unwrap();
        let matches = manager.matches_changed().recv().unwrap();
        manager.query_finished().recv().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].runner_id().as_deref(), Some("a"));
    }
}
