//! `runner_dispatch` fans a free-form text query out to a set of pluggable
//! "runner" match providers, aggregates and ranks what comes back, and
//! learns from launch history.
//!
//! The [`RunnerManager`] in [`manager`] is the entry point: load one or more
//! [`Runner`]s (in-process, or adapted from a remote service via [`ipc`]),
//! then call `launch_query` and subscribe to `matches_changed`.
//!
//! # Examples
//!
//! ```no_run
//! use runner_dispatch::prelude::*;
//!
//! # fn main() {
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let history = HistoryStore::new(Box::new(InMemoryConfigGroup::default()), "default", 1);
//! let manager = RunnerManager::new(runtime.handle().clone(), history);
//! manager.launch_query("firefox", None).unwrap();
//! let matches = manager.matches_changed().recv().unwrap();
//! # let _ = matches;
//! # }
//! ```

#![warn(missing_docs)]

#[macro_use]
extern crate log;

pub mod action;
pub mod config;
pub mod context;
pub mod error;
pub mod history;
pub mod icon;
pub mod ipc;
pub mod manager;
pub mod match_item;
pub mod prelude;
pub mod runner;
pub mod scheduler;
pub mod store;

pub use action::Action;
pub use context::RunnerContext;
pub use error::{DispatchError, Result};
pub use history::HistoryStore;
pub use manager::RunnerManager;
pub use match_item::{QueryMatch, QueryMatchBuilder};
pub use runner::{Runner, RunnerMetadata, SpeedHint};
