//! Per-environment query history and launch-count learning.
//!
//! Persistence is expressed purely in terms of the [`crate::config::ConfigGroup`]
//! abstraction: `PlasmaRunnerManager.LaunchCounts` and
//! `History-<env_id>.Entries`.

use std::collections::HashMap;

use crate::config::ConfigGroup;

const LAUNCH_COUNTS_GROUP: &str = "PlasmaRunnerManager";
const LAUNCH_COUNTS_KEY: &str = "LaunchCounts";
const HISTORY_ENTRIES_KEY: &str = "Entries";

fn history_group(environment: &str) -> String {
    format!("History-{environment}")
}

/// Launch-count bonus curve: monotone increasing in `count`,
/// `bonus(0) == 0`, strictly capped below `0.5`.
fn launch_count_bonus(count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    let log = (1.0 + count as f64).log2();
    0.5 * (1.0 - 1.0 / (1.0 + log))
}

/// History and launch-count store, serialized through a [`ConfigGroup`].
pub struct HistoryStore {
    config: Box<dyn ConfigGroup>,
    environment: String,
    enabled: bool,
    change_count_before_saving: u32,
    dirty_writes: u32,
    launch_counts: HashMap<String, u64>,
    history: Vec<String>,
}

impl HistoryStore {
    /// Loads history/launch-counts for `environment` from `config`.
    /// `change_count_before_saving` is a batching knob for persistence
    /// (default `1`; tests may raise it to avoid a write per call).
    pub fn new(config: Box<dyn ConfigGroup>, environment: impl Into<String>, change_count_before_saving: u32) -> Self {
        let environment = environment.into();
        let launch_counts = config
            .entries(LAUNCH_COUNTS_GROUP, LAUNCH_COUNTS_KEY)
            .into_iter()
            .filter_map(|line| parse_count_line(&line))
            .collect();
        let history = config.entries(&history_group(&environment), HISTORY_ENTRIES_KEY);

        Self {
            config,
            environment,
            enabled: true,
            change_count_before_saving: change_count_before_saving.max(1),
            dirty_writes: 0,
            launch_counts,
            history,
        }
    }

    /// Enables or disables history recording without losing existing data.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether history recording is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Switches to a different environment identifier, (re)loading its
    /// history from the backing config.
    pub fn set_environment(&mut self, environment: impl Into<String>) {
        self.environment = environment.into();
        self.history = self.config.entries(&history_group(&self.environment), HISTORY_ENTRIES_KEY);
    }

    /// Records a successful run of `query_text` (history) and `count_key`
    /// (launch-count learning), unless history recording is disabled or
    /// `query_text` starts with whitespace.
    pub fn record_run(&mut self, query_text: &str, count_key: &str) {
        *self.launch_counts.entry(count_key.to_string()).or_insert(0) += 1;

        if self.enabled {
            let trimmed = query_text.trim();
            if !trimmed.is_empty() && !query_text.starts_with(char::is_whitespace) {
                self.history.retain(|e| e != trimmed);
                self.history.insert(0, trimmed.to_string());
            }
        }

        self.dirty_writes += 1;
        if self.dirty_writes >= self.change_count_before_saving {
            self.persist();
            self.dirty_writes = 0;
        }
    }

    /// Forces a write of the current in-memory state to the backing config.
    pub fn persist(&self) {
        let lines = self
            .launch_counts
            .iter()
            .map(|(term, count)| format!("{count} {term}"))
            .collect();
        self.config.set_entries(LAUNCH_COUNTS_GROUP, LAUNCH_COUNTS_KEY, lines);
        self.config
            .set_entries(&history_group(&self.environment), HISTORY_ENTRIES_KEY, self.history.clone());
    }

    /// History entries, most-recent first.
    pub fn entries(&self) -> &[String] {
        &self.history
    }

    /// Removes the entry at `index`, if present.
    pub fn remove(&mut self, index: usize) {
        if index < self.history.len() {
            self.history.remove(index);
            self.persist();
        }
    }

    /// The first history entry starting with `prefix`, or `None`.
    pub fn suggest(&self, prefix: &str) -> Option<&str> {
        self.history.iter().find(|e| e.starts_with(prefix)).map(String::as_str)
    }

    /// The relevance bonus for `count_key`: `min(0.5, f(count))`.
    pub fn bonus_for(&self, count_key: &str) -> f64 {
        let count = self.launch_counts.get(count_key).copied().unwrap_or(0);
        launch_count_bonus(count)
    }
}

fn parse_count_line(line: &str) -> Option<(String, u64)> {
    let (count, term) = line.split_once(' ')?;
    let count: u64 = count.parse().ok()?;
    Some((term.to_string(), count))
}
