//! Convenience re-exports of commonly used types.
//!
//! This module provides a convenient way to import the commonly used
//! runner-dispatch types and traits with a single `use runner_dispatch::prelude::*;`
//! statement.

pub use crate::action::Action;
pub use crate::config::{ConfigGroup, InMemoryConfigGroup, RonFileConfigGroup};
pub use crate::context::{RequestedQueryUpdate, RunnerContext};
pub use crate::error::{DispatchError, Result};
pub use crate::history::HistoryStore;
pub use crate::icon::{Icon, RemoteImage};
pub use crate::ipc::adapter::IpcRunnerAdapter;
pub use crate::ipc::transport::{IpcTransport, LocalSocketTransport, MockTransport};
pub use crate::manager::RunnerManager;
pub use crate::match_item::{MatchData, QueryMatch, QueryMatchBuilder};
pub use crate::runner::{Runner, RunnerId, RunnerMetadata, SpeedHint, trigger_words_gate};
pub use crate::scheduler::{ActivationHook, RelevanceBonusFn, Scheduler, SessionState};
pub use crate::store::{Favorites, MatchStore};
pub use std::sync::Arc;
