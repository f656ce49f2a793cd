//! The query scheduler — worker pool, session lifecycle, slow-runner
//! back-off and the throttled `matches_changed` emission.
//!
//! The worker pool and per-job cancellation handle follow the same shape as
//! a `rayon::ThreadPool` sized by `available_parallelism()` plus atomic
//! counters for cooperative cancellation; the timer-driven event loop is a
//! `tokio::select!` over timer/channel events on a single façade thread,
//! with `kanal` channels standing in for UI callbacks. The session state
//! machine (`Idle -> Preparing -> Active -> TearingDown -> Idle`) has no
//! equivalent in a plain matcher — it exists because runners need session
//! `prepare`/`teardown` signals bracketing a whole run of queries, not just
//! a single one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::action::Action;
use crate::context::RunnerContext;
use crate::match_item::QueryMatch;
use crate::runner::{Runner, RunnerId, SpeedHint};
use crate::store::{Favorites, MatchStore};

/// Minimum gap between two outbound `matches_changed` emissions within a
/// single query.
const THROTTLE_GAP: Duration = Duration::from_millis(250);
/// How long a slow runner's jobs wait before being admitted.
const SLOW_GATE_DELAY: Duration = Duration::from_millis(400);
/// A `normal` runner exceeding this is demoted to `slow`.
const SLOW_DEMOTE_THRESHOLD: Duration = Duration::from_millis(1500);
/// A `slow` runner completing under this, on long-enough queries, counts
/// towards promotion back to `normal`.
const FAST_RUN_THRESHOLD: Duration = Duration::from_millis(250);
/// Consecutive fast runs (on queries at least this long) needed to promote.
const PROMOTE_STREAK: u32 = 3;
const PROMOTE_MIN_QUERY_LEN: usize = 3;

/// The session lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No query has been launched since construction or the last teardown.
    Idle,
    /// `prepare` is being/has been sent to this session's runners.
    Preparing,
    /// Steady state: queries are being dispatched and answered.
    Active,
    /// `match_session_complete()` was called and the scheduler is waiting
    /// for in-flight jobs to drain before emitting `teardown`.
    TearingDown,
}

/// Per-runner observed-latency state used to promote/demote between the
/// `normal` and `slow` dispatch classes at runtime.
#[derive(Clone, Copy)]
struct SpeedTracking {
    effective: SpeedHint,
    fast_streak: u32,
}

struct GenerationState {
    id: u64,
    context: RunnerContext,
    /// Runners still waiting on this generation's slow-gate timer.
    slow_gate_notify: Arc<tokio::sync::Notify>,
    /// Set right before `slow_gate_notify.notify_waiters()` fires, so a job
    /// that checks in *after* the timer already fired doesn't wait on a
    /// notification it can never receive (`Notify::notify_waiters` only
    /// wakes tasks already registered as waiting — a plain `notified().await`
    /// race-loses against a timer that fires between job dispatch and the
    /// first poll).
    slow_gate_fired: Arc<std::sync::atomic::AtomicBool>,
    cancel: CancellationToken,
    /// Outstanding jobs for this generation, across every runner.
    total_inflight: usize,
    /// Outstanding jobs for this generation, per runner — used for the
    /// deferred-run check.
    inflight_by_runner: HashMap<RunnerId, usize>,
    last_emit: Instant,
    throttle_armed: bool,
}

struct SchedulerState {
    session: SessionState,
    prepared_runners: Vec<Arc<dyn Runner>>,
    session_complete_requested: bool,
    generation: Option<GenerationState>,
    speeds: HashMap<RunnerId, SpeedTracking>,
    semaphores: HashMap<RunnerId, Arc<tokio::sync::Semaphore>>,
    deferred_run: HashMap<RunnerId, (Arc<dyn Runner>, QueryMatch, Option<Action>)>,
    last_query: Option<String>,
    last_runner_filter: Option<RunnerId>,
}

/// Called exactly once, synchronously, right after a runner's default or
/// non-default activation executes — whether dispatched immediately or
/// after a deferred wait. The manager uses this hook to record
/// history/launch-counts at the right moment for both cases uniformly.
pub type ActivationHook = Arc<dyn Fn(&RunnerContext, &QueryMatch) + Send + Sync>;

/// Computes the history/launch-count relevance bonus for a match
/// Applied before sorting, since it can change ordering.
pub type RelevanceBonusFn = Arc<dyn Fn(&QueryMatch) -> f64 + Send + Sync>;

/// The scheduler: owns the worker pool, the session state
/// machine, and the throttled outbound `matches_changed`/`query_finished`
/// signals. Shared (via `Arc`) between the façade and every background task
/// it spawns.
pub struct Scheduler {
    self_handle: std::sync::Weak<Scheduler>,
    pool: rayon::ThreadPool,
    per_runner_cap: usize,
    handle: tokio::runtime::Handle,
    state: Mutex<SchedulerState>,
    favorites: Mutex<Favorites>,
    limit: std::sync::atomic::AtomicUsize,
    relevance_bonus: Mutex<RelevanceBonusFn>,
    on_activated: Mutex<ActivationHook>,
    matches_changed_tx: kanal::Sender<Vec<QueryMatch>>,
    matches_changed_rx: kanal::Receiver<Vec<QueryMatch>>,
    query_finished_tx: kanal::Sender<()>,
    query_finished_rx: kanal::Receiver<()>,
    request_update_query_string_tx: kanal::Sender<crate::context::RequestedQueryUpdate>,
    request_update_query_string_rx: kanal::Receiver<crate::context::RequestedQueryUpdate>,
}

impl Scheduler {
    /// Builds a scheduler with a worker pool sized to the host's hardware
    /// (`src/matcher.rs`'s `NUM_THREADS`/`OPT_MATCHER_THREAD_POOL` pattern).
    /// `handle` is the tokio runtime the scheduler's timers and per-job
    /// semaphore waits run on.
    pub fn new(handle: tokio::runtime::Handle) -> Arc<Self> {
        let num_threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("runner-dispatch-worker-{i}"))
            .build()
            .expect("failed to build runner worker pool");
        let per_runner_cap = num_threads.div_ceil(2).max(2);

        let (matches_changed_tx, matches_changed_rx) = kanal::unbounded();
        let (query_finished_tx, query_finished_rx) = kanal::unbounded();
        let (request_update_query_string_tx, request_update_query_string_rx) = kanal::unbounded();

        Arc::new_cyclic(|weak| Self {
            self_handle: weak.clone(),
            pool,
            per_runner_cap,
            handle,
            state: Mutex::new(SchedulerState {
                session: SessionState::Idle,
                prepared_runners: Vec::new(),
                session_complete_requested: false,
                generation: None,
                speeds: HashMap::new(),
                semaphores: HashMap::new(),
                deferred_run: HashMap::new(),
                last_query: None,
                last_runner_filter: None,
            }),
            favorites: Mutex::new(Favorites::default()),
            limit: std::sync::atomic::AtomicUsize::new(0),
            relevance_bonus: Mutex::new(Arc::new(|_| 0.0)),
            on_activated: Mutex::new(Arc::new(|_, _| {})),
            matches_changed_tx,
            matches_changed_rx,
            query_finished_tx,
            query_finished_rx,
            request_update_query_string_tx,
            request_update_query_string_rx,
        })
    }

    /// Clones out an owned handle to this scheduler from a `&self` method.
    /// Always succeeds: a `Scheduler` is only ever reachable behind the
    /// `Arc` that [`Self::new`] returns.
    fn arc_self(&self) -> Arc<Self> {
        self.self_handle.upgrade().expect("Scheduler is always held behind the Arc returned by Scheduler::new")
    }

    /// Replaces the favorites list used for category scoring.
    pub fn set_favorites(&self, favorites: Favorites) {
        *self.favorites.lock() = favorites;
    }

    /// Sets the flattened-view limit (`0` = uncapped).
    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, std::sync::atomic::Ordering::Relaxed);
    }

    /// Installs the history/launch-count bonus function.
    pub fn set_relevance_bonus_fn(&self, f: RelevanceBonusFn) {
        *self.relevance_bonus.lock() = f;
    }

    /// Installs the post-activation hook (history recording).
    pub fn set_activation_hook(&self, f: ActivationHook) {
        *self.on_activated.lock() = f;
    }

    /// Subscribes to the `matches_changed(list)` signal.
    pub fn matches_changed(&self) -> kanal::Receiver<Vec<QueryMatch>> {
        self.matches_changed_rx.clone()
    }

    /// Subscribes to the `query_finished()` signal.
    pub fn query_finished(&self) -> kanal::Receiver<()> {
        self.query_finished_rx.clone()
    }

    /// Subscribes to the `request_update_query_string(text, cursor)` signal.
    pub fn request_update_query_string(&self) -> kanal::Receiver<crate::context::RequestedQueryUpdate> {
        self.request_update_query_string_rx.clone()
    }

    /// The context backing the current (or most recently launched) query,
    /// if any query has been launched yet.
    pub fn current_context(&self) -> Option<RunnerContext> {
        self.state.lock().generation.as_ref().map(|g| g.context.clone())
    }

    fn semaphore_for(state: &mut SchedulerState, runner_id: &str, cap: usize) -> Arc<tokio::sync::Semaphore> {
        state
            .semaphores
            .entry(runner_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Semaphore::new(cap)))
            .clone()
    }

    /// Core entry point: `launch_query`. `runners` is the
    /// manager's currently loaded, allowed set (already excludes anything
    /// the host has suspended via `set_allowed_runners`); `only` restricts
    /// to a single runner id (single-runner mode, gates bypassed).
    pub fn launch_query(&self, runners: &[Arc<dyn Runner>], query: &str, only: Option<&str>) {
        let trimmed = query.trim();
        let single_runner_mode = only.is_some();

        {
            let state = self.state.lock();
            if state.last_query.as_deref() == Some(trimmed) && state.last_runner_filter.as_deref() == only {
                return;
            }
        }

        self.prepare_session_if_needed(runners, only);

        // reset(): invalidate the old generation, cancel its background
        // tasks, and start a fresh one. Late writes from still-running old
        // jobs land on the invalidated context and are silently discarded
        // (`RunnerContext::add_match`).
        let (dirty_tx, dirty_rx) = kanal::unbounded_async();
        let context = RunnerContext::new(trimmed, single_runner_mode, Some(dirty_tx.to_sync()));

        let mut state = self.state.lock();
        let generation_id = state.generation.as_ref().map_or(1, |g| g.id + 1);
        if let Some(old) = state.generation.take() {
            old.context.invalidate();
            old.cancel.cancel();
        }
        let cancel = CancellationToken::new();
        state.generation = Some(GenerationState {
            id: generation_id,
            context: context.clone(),
            slow_gate_notify: Arc::new(tokio::sync::Notify::new()),
            slow_gate_fired: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            cancel: cancel.clone(),
            total_inflight: 0,
            inflight_by_runner: HashMap::new(),
            last_emit: Instant::now().checked_sub(THROTTLE_GAP).unwrap_or_else(Instant::now),
            throttle_armed: false,
        });
        state.last_query = Some(trimmed.to_string());
        state.last_runner_filter = only.map(str::to_string);
        drop(state);

        self.spawn_dirty_listener(generation_id, dirty_rx, cancel.clone());

        if trimmed.is_empty() {
            // Empty-query reset: emit immediately, nothing to dispatch.
            self.emit_matches(generation_id);
            let _ = self.query_finished_tx.send(());
            return;
        }

        let selected: Vec<Arc<dyn Runner>> = runners
            .iter()
            .filter(|r| only.is_none_or(|id| r.metadata().id == id))
            .filter(|r| single_runner_mode || passes_gates(r.as_ref(), trimmed))
            .cloned()
            .collect();

        self.arm_slow_gate(generation_id, cancel);

        for runner in selected {
            self.dispatch_job(generation_id, runner, context.clone());
        }

        // No runner was actually dispatched (none selected, or all gated
        // out): there is nothing for `on_job_done` to drain, so the
        // finished-check has to run here instead.
        self.check_generation_finished(generation_id);
    }

    fn prepare_session_if_needed(&self, runners: &[Arc<dyn Runner>], only: Option<&str>) {
        let mut state = self.state.lock();
        if state.session != SessionState::Idle {
            return;
        }
        state.session = SessionState::Preparing;
        let targets: Vec<Arc<dyn Runner>> = match only {
            Some(id) => runners.iter().filter(|r| r.metadata().id == id).cloned().collect(),
            None => runners.to_vec(),
        };
        drop(state);

        for runner in &targets {
            runner.prepare();
        }

        let mut state = self.state.lock();
        state.prepared_runners = targets;
        state.session = SessionState::Active;
    }

    fn arm_slow_gate(&self, generation_id: u64, cancel: CancellationToken) {
        let state = self.state.lock();
        let Some(gen) = &state.generation else { return };
        if gen.id != generation_id {
            return;
        }
        let notify = gen.slow_gate_notify.clone();
        let fired = gen.slow_gate_fired.clone();
        drop(state);

        self.handle.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(SLOW_GATE_DELAY) => {
                    fired.store(true, std::sync::atomic::Ordering::Release);
                    notify.notify_waiters();
                }
                () = cancel.cancelled() => {}
            }
        });
    }

    fn spawn_dirty_listener(&self, generation_id: u64, dirty_rx: kanal::AsyncReceiver<()>, cancel: CancellationToken) {
        let this = self.arc_self();
        self.handle.spawn(async move {
            loop {
                tokio::select! {
                    msg = dirty_rx.recv() => {
                        if msg.is_err() { break; }
                        this.on_dirty(generation_id);
                    }
                    () = cancel.cancelled() => break,
                }
            }
        });
    }

    fn on_dirty(&self, generation_id: u64) {
        let mut state = self.state.lock();
        let Some(gen) = &mut state.generation else { return };
        if gen.id != generation_id {
            return;
        }
        let elapsed = gen.last_emit.elapsed();
        if elapsed >= THROTTLE_GAP {
            drop(state);
            self.emit_matches(generation_id);
            return;
        }
        if gen.throttle_armed {
            return;
        }
        gen.throttle_armed = true;
        let remaining = THROTTLE_GAP - elapsed;
        let cancel = gen.cancel.clone();
        drop(state);

        let this = self.arc_self();
        self.handle.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(remaining) => { this.emit_matches(generation_id); }
                () = cancel.cancelled() => {}
            }
        });
    }

    /// Builds the current aggregated+limited projection and sends it on
    /// `matches_changed`, applying the history bonus before sorting (since
    /// the bonus can change relative order).
    fn emit_matches(&self, generation_id: u64) {
        let (matches, favorites, limit) = {
            let mut state = self.state.lock();
            let Some(gen) = &mut state.generation else { return };
            if gen.id != generation_id {
                return;
            }
            gen.last_emit = Instant::now();
            gen.throttle_armed = false;
            (
                gen.context.matches(),
                self.favorites.lock().clone(),
                self.limit.load(std::sync::atomic::Ordering::Relaxed),
            )
        };

        let bonus_fn = self.relevance_bonus.lock().clone();
        let boosted: Vec<QueryMatch> = matches
            .into_iter()
            .map(|m| {
                let bonus = bonus_fn(&m);
                if bonus == 0.0 { m } else { m.clone().with_relevance(m.relevance() + bonus) }
            })
            .collect();

        let flattened = MatchStore::from_matches(boosted).flatten(&favorites, limit);
        let _ = self.matches_changed_tx.send(flattened);
    }

    fn dispatch_job(&self, generation_id: u64, runner: Arc<dyn Runner>, context: RunnerContext) {
        let scheduler = self.arc_self();
        let runner_id = runner.metadata().id.clone();
        let cap = self.per_runner_cap;

        let (semaphore, slow_gate_notify, slow_gate_fired, is_slow) = {
            let mut state = self.state.lock();
            let Some(gen) = &mut state.generation else { return };
            if gen.id != generation_id {
                return;
            }
            gen.total_inflight += 1;
            *gen.inflight_by_runner.entry(runner_id.clone()).or_insert(0) += 1;

            let speed = state
                .speeds
                .entry(runner_id.clone())
                .or_insert(SpeedTracking {
                    effective: runner.metadata().speed_hint,
                    fast_streak: 0,
                })
                .effective;

            let semaphore = Self::semaphore_for(&mut state, &runner_id, cap);
            let gen = state.generation.as_ref().unwrap();
            (semaphore, gen.slow_gate_notify.clone(), gen.slow_gate_fired.clone(), speed == SpeedHint::Slow)
        };

        let handle = self.handle.clone();
        let query_len = context.query().chars().count();

        self.pool.spawn(move || {
            if is_slow {
                // Race-free wait: `enable()` registers this future as a
                // waiter *before* we check whether the gate already fired,
                // so a `notify_waiters()` call that lands in between is
                // never missed (plain `notified().await` would be).
                handle.block_on(async {
                    let notified = slow_gate_notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    if !slow_gate_fired.load(std::sync::atomic::Ordering::Acquire) {
                        notified.await;
                    }
                });
            }
            if !context.is_valid() {
                scheduler.on_job_done(generation_id, &runner_id, Duration::ZERO, query_len);
                return;
            }
            let _permit = handle.block_on(semaphore.acquire_owned()).expect("semaphore never closed");

            let start = Instant::now();
            runner.match_query(&context);
            let elapsed = start.elapsed();
            drop(_permit);

            scheduler.on_job_done(generation_id, &runner_id, elapsed, query_len);
            scheduler.run_deferred_if_ready(&runner_id, &runner, &context);
        });
    }

    fn run_deferred_if_ready(&self, runner_id: &str, runner: &Arc<dyn Runner>, context: &RunnerContext) {
        let deferred = {
            let mut state = self.state.lock();
            let still_in_flight = state.generation.as_ref().is_some_and(|g| g.inflight_by_runner.get(runner_id).copied().unwrap_or(0) > 0);
            if still_in_flight {
                return;
            }
            state.deferred_run.remove(runner_id)
        };
        let Some((_runner, m, action)) = deferred else { return };
        let _ = runner.run(context, &m, action.as_ref());
        (self.on_activated.lock().clone())(context, &m);
    }

    fn on_job_done(&self, generation_id: u64, runner_id: &str, elapsed: Duration, query_len: usize) {
        let should_finish = {
            let mut state = self.state.lock();

            if let Some(tracking) = state.speeds.get_mut(runner_id) {
                match tracking.effective {
                    SpeedHint::Normal if elapsed > SLOW_DEMOTE_THRESHOLD => {
                        tracking.effective = SpeedHint::Slow;
                        tracking.fast_streak = 0;
                    }
                    SpeedHint::Slow => {
                        if elapsed < FAST_RUN_THRESHOLD && query_len >= PROMOTE_MIN_QUERY_LEN {
                            tracking.fast_streak += 1;
                            if tracking.fast_streak >= PROMOTE_STREAK {
                                tracking.effective = SpeedHint::Normal;
                                tracking.fast_streak = 0;
                            }
                        } else {
                            tracking.fast_streak = 0;
                        }
                    }
                    SpeedHint::Normal => {}
                }
            }

            let Some(gen) = &mut state.generation else { return };
            if gen.id != generation_id {
                return;
            }
            gen.total_inflight = gen.total_inflight.saturating_sub(1);
            if let Some(count) = gen.inflight_by_runner.get_mut(runner_id) {
                *count = count.saturating_sub(1);
            }
            gen.total_inflight == 0
        };

        if should_finish {
            self.finish_generation(generation_id);
        }
    }

    /// `match_session_complete()`: marks the session ready
    /// to tear down once every in-flight job has drained.
    pub fn match_session_complete(&self) {
        let mut state = self.state.lock();
        state.session_complete_requested = true;
        let drained = state.generation.as_ref().is_none_or(|g| g.total_inflight == 0);
        drop(state);
        if drained {
            self.maybe_teardown();
        }
    }

    /// Checks whether `generation_id` has no outstanding jobs and, if so,
    /// finishes it. Used right after dispatch for the case where nothing
    /// was actually dispatched (every runner gated out, or none selected) —
    /// otherwise `on_job_done` is the only thing that would ever notice.
    fn check_generation_finished(&self, generation_id: u64) {
        let finished = {
            let state = self.state.lock();
            state.generation.as_ref().is_some_and(|g| g.id == generation_id && g.total_inflight == 0)
        };
        if finished {
            self.finish_generation(generation_id);
        }
    }

    fn finish_generation(&self, generation_id: u64) {
        self.emit_matches(generation_id);
        let _ = self.query_finished_tx.send(());
        self.maybe_teardown();
    }

    fn maybe_teardown(&self) {
        let mut state = self.state.lock();
        if !state.session_complete_requested || state.session == SessionState::Idle {
            return;
        }
        let drained = state.generation.as_ref().is_none_or(|g| g.total_inflight == 0);
        if !drained {
            return;
        }
        state.session = SessionState::TearingDown;
        let targets = std::mem::take(&mut state.prepared_runners);
        drop(state);

        for runner in &targets {
            runner.teardown();
        }

        let mut state = self.state.lock();
        state.session = SessionState::Idle;
        state.session_complete_requested = false;
    }

    /// Records a request, raised by a runner, to rewrite the visible query
    /// string, proxying it as `request_update_query_string`.
    pub fn propagate_query_update(&self, update: crate::context::RequestedQueryUpdate) {
        let _ = self.request_update_query_string_tx.send(update);
    }

    /// `run(match, action)`: executes
    /// immediately unless a job for `runner` is currently in flight for the
    /// current generation, in which case the call is deferred until that
    /// job completes. Returns whether the
    /// launcher should close; a deferred run cannot know this synchronously
    /// and conservatively reports `false`.
    pub fn run(&self, runner: Arc<dyn Runner>, m: QueryMatch, action: Option<Action>) -> bool {
        let runner_id = runner.metadata().id.clone();
        let context = {
            let mut state = self.state.lock();
            let in_flight = state
                .generation
                .as_ref()
                .is_some_and(|g| g.inflight_by_runner.get(&runner_id).copied().unwrap_or(0) > 0);
            if in_flight {
                state.deferred_run.insert(runner_id, (runner, m, action));
                return false;
            }
            state.generation.as_ref().map(|g| g.context.clone())
        };

        let Some(context) = context else { return false };
        let result = runner.run(&context, &m, action.as_ref());
        (self.on_activated.lock().clone())(&context, &m);
        result
    }

    /// Current session state, mostly useful for tests.
    pub fn session_state(&self) -> SessionState {
        self.state.lock().session
    }
}

/// Gates applied before invoking `match_query`, bypassed in single-runner
/// mode.
fn passes_gates(runner: &dyn Runner, query: &str) -> bool {
    let meta = runner.metadata();
    if query.chars().count() < meta.min_letter_count {
        return false;
    }
    if let Some(re) = &meta.match_regex
        && !re.is_match(query)
    {
        return false;
    }
    true
}
