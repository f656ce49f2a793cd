//! Launch-count relevance boosting and run-time history recording,
//! driven end to end through the manager.

mod support;

use runner_dispatch::prelude::*;
use support::{EchoRunner, TwoMatchRunner, last_queued, rt};

#[test]
fn history_launch_count_boosts_relevance_within_the_cap() {
    let runtime = rt();
    let mut history = HistoryStore::new(Box::new(InMemoryConfigGroup::default()), "test-env", 100);
    for _ in 0..5 {
        history.record_run("foo", "foo");
    }
    let manager = RunnerManager::new(runtime.handle().clone(), history);
    manager.load_runner(TwoMatchRunner::new("two"));

    manager.launch_query("x", None).unwrap();
    manager.query_finished().recv().unwrap();
    let last = last_queued(&manager.matches_changed());

    let foo = last.iter().find(|m| m.text() == "foo").expect("foo present");
    let bar = last.iter().find(|m| m.text() == "bar").expect("bar present");
    assert!(foo.relevance() > bar.relevance(), "the launch-count bonus must favor foo");
    assert!(foo.relevance() < 0.6, "bonus must stay well under the 0.5 cap plus base relevance");
}

#[test]
fn running_a_match_records_history_and_dedups_repeats() {
    let manager = support::manager_with(1);
    manager.load_runner(EchoRunner::new("echo"));

    for query in ["first", "second", "first"] {
        manager.launch_query(query, None).unwrap();
        manager.query_finished().recv().unwrap();
        let matches = last_queued(&manager.matches_changed());
        assert_eq!(matches.len(), 1);
        manager.run(matches[0].clone(), None);
    }

    assert_eq!(manager.history(), vec!["first".to_string(), "second".to_string()]);
}
