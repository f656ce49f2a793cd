//! Non-default activations on a [`crate::match_item::QueryMatch`].

use std::fmt;

/// A secondary activation a match exposes besides its default `run`, e.g.
/// "copy to clipboard" or "open containing folder".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    id: String,
    text: String,
    icon_source: Option<String>,
}

impl Action {
    /// Builds a new action. `id` is opaque and is echoed back to the runner
    /// (or IPC service) that produced it when the action is selected.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            icon_source: None,
        }
    }

    /// Attaches an icon source (theme name or inline data reference).
    #[must_use]
    pub fn with_icon(mut self, icon_source: impl Into<String>) -> Self {
        self.icon_source = Some(icon_source.into());
        self
    }

    /// The action's opaque identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display text for the action.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Icon source, if any.
    pub fn icon_source(&self) -> Option<&str> {
        self.icon_source.as_deref()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.text, self.id)
    }
}
