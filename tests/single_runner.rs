//! Single-runner mode restricts dispatch to one runner and bypasses
//! that runner's own triggering gates.

mod support;

use runner_dispatch::prelude::*;
use support::{EchoRunner, last_queued, manager_with};

#[test]
fn single_runner_mode_filters_runners_and_bypasses_gates() {
    let manager = manager_with(1);
    manager.load_runner(EchoRunner::gated("picky", 50));
    manager.load_runner(EchoRunner::new("plain"));

    manager.launch_query("foo", Some("picky")).unwrap();
    manager.query_finished().recv().unwrap();
    let last = last_queued(&manager.matches_changed());

    assert_eq!(last.len(), 1);
    assert_eq!(last[0].runner_id().as_deref(), Some("picky"), "single-runner mode must bypass the min-letter-count gate");
}

#[test]
fn unknown_single_runner_filter_is_rejected() {
    let manager = manager_with(1);
    manager.load_runner(EchoRunner::new("plain"));
    let err = manager.launch_query("foo", Some("nope")).unwrap_err();
    assert!(matches!(err, DispatchError::UnknownRunner(id) if id == "nope"));
}
