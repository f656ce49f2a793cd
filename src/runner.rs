//! The in-process runner contract.
//!
//! A [`Runner`] is a plugin that answers queries. It is deliberately a thin
//! trait — the heavy lifting (gating, scheduling, context sharing) lives in
//! [`crate::scheduler`] and [`crate::context`] so that a runner author only
//! has to implement matching and activation, keeping the per-item contract
//! small and pushing matching/ranking into the matcher.

use std::fmt;
use std::sync::Weak;

use regex::Regex;

use crate::action::Action;
use crate::context::RunnerContext;
use crate::icon::Icon;

/// A runner's unique id, e.g. `"org.example.calculator"`.
pub type RunnerId = String;

/// Whether a runner is expected to answer quickly or may take a while.
///
/// Declared speed is a hint; the scheduler promotes/demotes at runtime
/// based on observed `match()` latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeedHint {
    /// Dispatched immediately on every query.
    #[default]
    Normal,
    /// Dispatched only after the slow-gate timer elapses.
    Slow,
}

/// Static, declarative properties of a runner, typically sourced from its
/// metadata file.
#[derive(Debug, Clone)]
pub struct RunnerMetadata {
    /// Unique identifier, used to namespace match ids and for `single_runner_mode`.
    pub id: RunnerId,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Display icon.
    pub icon: Icon,
    /// Whether this runner's matches participate in cross-runner de-dup by id.
    pub unique_results: bool,
    /// Whether this runner's matches may be replaced by a later unique match
    /// with the same id.
    pub weak_results: bool,
    /// Minimum query length before `match()` is invoked (bypassed in
    /// single-runner mode).
    pub min_letter_count: usize,
    /// Optional gate: `match()` is skipped unless the query matches this
    /// regex (bypassed in single-runner mode).
    pub match_regex: Option<Regex>,
    /// Whether action discovery happens once per process rather than once
    /// per session.
    pub request_actions_once: bool,
    /// Declared speed class.
    pub speed_hint: SpeedHint,
    /// Relative dispatch priority; higher runs are not specified to run
    /// first, but may be used by a host to order ties.
    pub priority_hint: i32,
}

impl RunnerMetadata {
    /// Minimal metadata with sane defaults, for tests and simple runners.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            icon: Icon::None,
            unique_results: false,
            weak_results: false,
            min_letter_count: 0,
            match_regex: None,
            request_actions_once: false,
            speed_hint: SpeedHint::Normal,
            priority_hint: 0,
        }
    }
}

/// Compiles a set of trigger words into a derived `match_regex` /
/// `min_letter_count` gate: `^(w1|w2|...)`, with `min_letter_count` set to
/// the length of the shortest word.
///
/// # Panics
///
/// Panics if `words` is empty; callers should only invoke this when trigger
/// words were actually configured.
pub fn trigger_words_gate(words: &[impl AsRef<str>]) -> (Regex, usize) {
    assert!(!words.is_empty(), "trigger_words_gate requires at least one word");
    let min_len = words.iter().map(|w| w.as_ref().chars().count()).min().unwrap_or(0);
    let alternation = words
        .iter()
        .map(|w| regex::escape(w.as_ref()))
        .collect::<Vec<_>>()
        .join("|");
    let regex = Regex::new(&format!("^(?:{alternation})")).expect("trigger word alternation is always a valid regex");
    (regex, min_len)
}

/// A plugin answering queries, run in-process.
///
/// `match_query` must be safe to call concurrently from multiple threads —
/// the scheduler may have several overlapping invocations in flight from
/// rapid keystrokes — and should poll `context.is_valid()` during any long
/// inner loop so it can return promptly once the query has been superseded.
pub trait Runner: Send + Sync {
    /// Static properties of this runner.
    fn metadata(&self) -> &RunnerMetadata;

    /// Produces matches for the query carried by `context`, appending them
    /// via [`RunnerContext::add_match`]. Called off the caller's thread.
    fn match_query(&self, context: &RunnerContext);

    /// Executes `m` (optionally via a non-default `action`). Returns
    /// whether the launcher should close.
    fn run(&self, context: &RunnerContext, m: &crate::match_item::QueryMatch, action: Option<&Action>) -> bool;

    /// Reloads this runner's own configuration. Called by the host, not by
    /// the scheduler directly.
    fn reload_configuration(&self) {}

    /// Session-begin signal.
    fn prepare(&self) {}

    /// Session-end signal.
    fn teardown(&self) {}

    /// Optional MIME data for drag-and-drop of a match.
    fn mime_data_for(&self, _m: &crate::match_item::QueryMatch) -> Option<Vec<u8>> {
        None
    }

    /// Called exactly once by [`crate::manager::RunnerManager::load_runner`],
    /// right after the runner is wrapped in its owning `Arc`. A runner that
    /// builds its own [`crate::match_item::QueryMatch`]es during
    /// `match_query` needs a weak handle to itself to hand to
    /// [`crate::match_item::QueryMatchBuilder::new`] (matches hold a weak,
    /// not owning, reference to their producing runner). Runners that
    /// never construct matches of their own (tests, pure
    /// forwarders) can ignore this.
    fn attach_self(&self, _handle: Weak<dyn Runner>) {}
}

impl fmt::Debug for dyn Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner").field("id", &self.metadata().id).finish()
    }
}
