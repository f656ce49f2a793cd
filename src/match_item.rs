//! [`QueryMatch`]: a single result row produced by a runner.

use std::sync::{Arc, Weak};

use crate::action::Action;
use crate::icon::Icon;
use crate::runner::Runner;

/// Opaque data a runner attaches to a match for its own use in `run()`.
/// Typically small (a path, a command line, an IPC service name); never
/// inspected by the scheduler or aggregator.
pub type MatchData = Arc<dyn std::any::Any + Send + Sync>;

/// A single result row.
///
/// Two matches are considered equal when they carry the same `id` — this
/// is what the de-dup map in [`crate::context::RunnerContext`] keys on.
#[derive(Clone)]
pub struct QueryMatch {
    runner: Weak<dyn Runner>,
    id: String,
    text: String,
    subtext: String,
    icon_source: Icon,
    category_label: String,
    category_relevance: f64,
    relevance: f64,
    actions: Vec<Action>,
    selected_action: Option<Action>,
    data: Option<MatchData>,
    urls: Vec<String>,
    enabled: bool,
    multiline: bool,
    mime_hint: Option<String>,
}

impl std::fmt::Debug for QueryMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryMatch")
            .field("id", &self.id)
            .field("text", &self.text)
            .field("category_label", &self.category_label)
            .field("category_relevance", &self.category_relevance)
            .field("relevance", &self.relevance)
            .finish_non_exhaustive()
    }
}

impl PartialEq for QueryMatch {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for QueryMatch {}

/// Builder for a [`QueryMatch`], constructed by a runner during `match_query`.
pub struct QueryMatchBuilder {
    runner: Weak<dyn Runner>,
    local_id: String,
    text: String,
    subtext: String,
    icon_source: Icon,
    category_label: String,
    category_relevance: f64,
    relevance: f64,
    actions: Vec<Action>,
    data: Option<MatchData>,
    urls: Vec<String>,
    enabled: bool,
    multiline: bool,
    mime_hint: Option<String>,
}

impl QueryMatchBuilder {
    /// Starts building a match produced by `runner` with the given
    /// runner-local id and display text.
    pub fn new(runner: &Arc<dyn Runner>, local_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            runner: Arc::downgrade(runner),
            local_id: local_id.into(),
            text: text.into(),
            subtext: String::new(),
            icon_source: Icon::None,
            category_label: String::from("Other"),
            category_relevance: 50.0,
            relevance: 0.5,
            actions: Vec::new(),
            data: None,
            urls: Vec::new(),
            enabled: true,
            multiline: false,
            mime_hint: None,
        }
    }

    /// Sets subtext.
    #[must_use]
    pub fn subtext(mut self, subtext: impl Into<String>) -> Self {
        self.subtext = subtext.into();
        self
    }

    /// Sets the icon.
    #[must_use]
    pub fn icon(mut self, icon: Icon) -> Self {
        self.icon_source = icon;
        self
    }

    /// Sets the display category.
    #[must_use]
    pub fn category(mut self, category_label: impl Into<String>, category_relevance: f64) -> Self {
        self.category_label = category_label.into();
        self.category_relevance = category_relevance.clamp(0.0, 100.0);
        self
    }

    /// Sets relevance in `[0, 1]`.
    #[must_use]
    pub fn relevance(mut self, relevance: f64) -> Self {
        self.relevance = relevance.clamp(0.0, 1.0);
        self
    }

    /// Adds a non-default action.
    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Attaches opaque runner-private data.
    #[must_use]
    pub fn data(mut self, data: MatchData) -> Self {
        self.data = Some(data);
        self
    }

    /// Sets the URLs associated with this match.
    #[must_use]
    pub fn urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    /// Marks the match disabled (displayed but not runnable).
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Marks the match as needing multi-line display.
    #[must_use]
    pub fn multiline(mut self, multiline: bool) -> Self {
        self.multiline = multiline;
        self
    }

    /// Sets a MIME type hint for drag-and-drop.
    #[must_use]
    pub fn mime_hint(mut self, mime_hint: impl Into<String>) -> Self {
        self.mime_hint = Some(mime_hint.into());
        self
    }

    /// Finalizes the match, computing its namespaced id:
    /// `<runner_id>_<local_id>` unless the runner advertises unique
    /// results, in which case `local_id` is used verbatim.
    pub fn build(self) -> QueryMatch {
        let id = match self.runner.upgrade() {
            Some(runner) if runner.metadata().unique_results => self.local_id.clone(),
            Some(runner) => format!("{}_{}", runner.metadata().id, self.local_id),
            None => self.local_id.clone(),
        };

        QueryMatch {
            runner: self.runner,
            id,
            text: self.text,
            subtext: self.subtext,
            icon_source: self.icon_source,
            category_label: self.category_label,
            category_relevance: self.category_relevance,
            relevance: self.relevance,
            actions: self.actions,
            selected_action: None,
            data: self.data,
            urls: self.urls,
            enabled: self.enabled,
            multiline: self.multiline,
            mime_hint: self.mime_hint,
        }
    }
}

impl QueryMatch {
    /// A weak reference to the runner that produced this match. Weak
    /// because a match may outlive the runner that produced it (the runner
    /// could be unloaded while the match still sits in a UI model).
    pub fn runner(&self) -> Option<Arc<dyn Runner>> {
        self.runner.upgrade()
    }

    /// The runner id this match originated from, if the runner is still alive.
    pub fn runner_id(&self) -> Option<String> {
        self.runner().map(|r| r.metadata().id.clone())
    }

    /// The match's id, as seen by de-dup and history.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Primary display text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Secondary display text.
    pub fn subtext(&self) -> &str {
        &self.subtext
    }

    /// Icon.
    pub fn icon_source(&self) -> &Icon {
        &self.icon_source
    }

    /// Display category label.
    pub fn category_label(&self) -> &str {
        &self.category_label
    }

    /// Category relevance in `[0, 100]`.
    pub fn category_relevance(&self) -> f64 {
        self.category_relevance
    }

    /// Match relevance in `[0, 1]`.
    pub fn relevance(&self) -> f64 {
        self.relevance
    }

    /// Returns a copy of this match with relevance replaced, still clamped
    /// to `[0, 1]`. Used by the history bonus.
    #[must_use]
    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = relevance.clamp(0.0, 1.0);
        self
    }

    /// Non-default actions available on this match.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Restricts the action set to only the given ids, in order, dropping
    /// any id that doesn't match an existing action. Used by the IPC
    /// adapter when a `RemoteMatch` carries an `actions` property.
    #[must_use]
    pub fn with_restricted_actions(mut self, ids: &[String]) -> Self {
        self.actions = ids
            .iter()
            .filter_map(|id| self.actions.iter().find(|a| a.id() == id).cloned())
            .collect();
        self
    }

    /// Currently selected non-default action, if any.
    pub fn selected_action(&self) -> Option<&Action> {
        self.selected_action.as_ref()
    }

    /// Sets the selected action (used when the caller picks a specific
    /// action to run instead of the default activation).
    #[must_use]
    pub fn with_selected_action(mut self, action: Option<Action>) -> Self {
        self.selected_action = action;
        self
    }

    /// Opaque runner-private payload.
    pub fn data(&self) -> Option<&MatchData> {
        self.data.as_ref()
    }

    /// URLs associated with this match.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Whether this match can be run.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether `text`/`subtext` should be rendered across multiple lines.
    pub fn multiline(&self) -> bool {
        self.multiline
    }

    /// MIME type hint, if any.
    pub fn mime_hint(&self) -> Option<&str> {
        self.mime_hint.as_deref()
    }
}
