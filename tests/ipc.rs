//! Two services answering under a wildcard pattern both contribute a
//! match, each tagged with its originating service, driven end to end
//! through [`RunnerManager`] rather than the adapter directly.

mod support;

use std::sync::Arc;

use runner_dispatch::prelude::*;
use support::rt;

fn remote_match(id: &str, text: &str) -> runner_dispatch::ipc::wire::RemoteMatch {
    runner_dispatch::ipc::wire::RemoteMatch {
        id: id.to_string(),
        text: text.to_string(),
        icon_name: String::new(),
        category_relevance: 80,
        relevance: 0.5,
        properties: std::collections::HashMap::new(),
    }
}

#[test]
fn wildcard_fan_in_through_the_manager() {
    let runtime = rt();
    let history = HistoryStore::new(Box::new(InMemoryConfigGroup::default()), "env", 1);
    let manager = RunnerManager::new(runtime.handle().clone(), history);

    let transport = MockTransport::default();
    transport.register("org.example.one", |req| match req {
        runner_dispatch::ipc::wire::IpcRequest::Match { .. } => {
            runner_dispatch::ipc::wire::IpcReply::Matches(vec![remote_match("a", "from one")])
        }
        _ => runner_dispatch::ipc::wire::IpcReply::Ack,
    });
    transport.register("org.example.two", |req| match req {
        runner_dispatch::ipc::wire::IpcRequest::Match { .. } => {
            runner_dispatch::ipc::wire::IpcReply::Matches(vec![remote_match("b", "from two")])
        }
        _ => runner_dispatch::ipc::wire::IpcReply::Ack,
    });

    let adapter = IpcRunnerAdapter::new(RunnerMetadata::new("wildcard", "Wildcard"), "org.example.*", Arc::new(transport), runtime.handle().clone()).unwrap();
    manager.load_runner(Arc::new(adapter));

    manager.launch_query("foo", None).unwrap();
    manager.query_finished().recv().unwrap();
    let last = support::last_queued(&manager.matches_changed());

    assert_eq!(last.len(), 2);
    let texts: std::collections::HashSet<_> = last.iter().map(|m| m.text().to_string()).collect();
    assert!(texts.contains("from one"));
    assert!(texts.contains("from two"));
}
