//! Adapts a set of remote services speaking the fixed IPC method set into a
//! single in-process [`Runner`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::action::Action;
use crate::context::RunnerContext;
use crate::error::DispatchError;
use crate::icon::Icon;
use crate::ipc::transport::IpcTransport;
use crate::ipc::wire::{IpcReply, IpcRequest, RemoteMatch, RemoteValue};
use crate::match_item::{MatchData, QueryMatch, QueryMatchBuilder};
use crate::runner::{Runner, RunnerMetadata, trigger_words_gate};

/// Soft cap on how long the match phase waits for every service to reply.
const MATCH_TIMEOUT: Duration = Duration::from_millis(1500);

/// Sidecar data the adapter stashes per in-flight match id so that `run()`
/// can route back to the originating service. Not part of the public
/// `QueryMatch` surface.
struct OriginTag {
    service: String,
}

/// An in-process [`Runner`] backed by one or more remote services reached
/// through an [`IpcTransport`].
pub struct IpcRunnerAdapter {
    metadata: RunnerMetadata,
    service_pattern: String,
    is_wildcard: bool,
    transport: Arc<dyn IpcTransport>,
    handle: tokio::runtime::Handle,
    self_handle: Mutex<Option<Weak<dyn Runner>>>,
    /// Actions cached per originating service, refreshed on `prepare()`
    /// unless `request_actions_once` is set.
    actions_by_service: RwLock<HashMap<String, Vec<Action>>>,
    actions_requested: std::sync::atomic::AtomicBool,
    origin_tags: RwLock<HashMap<String, OriginTag>>,
}

impl IpcRunnerAdapter {
    /// Builds an adapter for the runner metadata entry naming `service`. A
    /// service name ending in `*` is treated as a wildcard prefix;
    /// otherwise it names exactly one service.
    ///
    /// `handle` is the tokio runtime the adapter dispatches IPC calls on —
    /// `Runner::match_query`/`run` are synchronous trait methods called
    /// from worker threads, so the adapter bridges to async IPC via
    /// `Handle::block_on`.
    ///
    /// Returns [`DispatchError::InvalidMetadata`] if the remote service's
    /// advertised `match-regex` fails to compile; a runner whose own match
    /// gate can't be built is refused rather than loaded with a broken or
    /// silently-ignored filter.
    pub fn new(
        mut metadata: RunnerMetadata,
        service: impl Into<String>,
        transport: Arc<dyn IpcTransport>,
        handle: tokio::runtime::Handle,
    ) -> Result<Self, DispatchError> {
        let service = service.into();
        let is_wildcard = service.ends_with('*');
        let service_pattern = if is_wildcard {
            service.trim_end_matches('*').to_string()
        } else {
            service.clone()
        };

        // Wildcard services aren't known until discovery runs, so `Config()`
        // is only probed eagerly for a single fixed service; a wildcard
        // runner's gates stay at whatever the metadata file declared.
        if !is_wildcard
            && let Ok(IpcReply::Config(remote_config)) = handle.block_on(transport.call(&service_pattern, &IpcRequest::Config))
        {
            if let Some(regex_src) = remote_config.match_regex {
                let re = regex::Regex::new(&regex_src).map_err(|e| DispatchError::InvalidMetadata {
                    id: metadata.id.clone(),
                    reason: format!("service {service_pattern} advertised an unparsable match-regex {regex_src:?}: {e}"),
                })?;
                metadata.match_regex = Some(re);
            }
            if let Some(min) = remote_config.min_letter_count {
                metadata.min_letter_count = min;
            }
            if !remote_config.trigger_words.is_empty() {
                let (re, min_len) = trigger_words_gate(&remote_config.trigger_words);
                metadata.match_regex = Some(re);
                metadata.min_letter_count = min_len;
            }
            metadata.request_actions_once = remote_config.actions_requested_once;
        }

        Ok(Self {
            metadata,
            service_pattern,
            is_wildcard,
            transport,
            handle,
            self_handle: Mutex::new(None),
            actions_by_service: RwLock::new(HashMap::new()),
            actions_requested: std::sync::atomic::AtomicBool::new(false),
            origin_tags: RwLock::new(HashMap::new()),
        })
    }

    async fn matching_services(&self) -> Vec<String> {
        if self.is_wildcard {
            self.transport.registered_services(&self.service_pattern).await
        } else {
            vec![self.service_pattern.clone()]
        }
    }

    async fn request_actions(&self) {
        let services = self.matching_services().await;
        let mut cache = self.actions_by_service.write();
        cache.clear();
        for service in services {
            let Ok(IpcReply::Actions(remote_actions)) = self.transport.call(&service, &IpcRequest::Actions).await else {
                continue;
            };
            let actions = remote_actions
                .into_iter()
                .map(|a| {
                    let mut action = Action::new(a.id, a.text);
                    if !a.icon_name.is_empty() {
                        action = action.with_icon(a.icon_name);
                    }
                    action
                })
                .collect();
            cache.insert(service, actions);
        }
    }

    fn runner_arc(&self) -> Option<Arc<dyn Runner>> {
        self.self_handle.lock().as_ref().and_then(Weak::upgrade)
    }

    fn to_query_match(&self, self_arc: &Arc<dyn Runner>, service: &str, remote: RemoteMatch) -> QueryMatch {
        let mut builder = QueryMatchBuilder::new(self_arc, remote.id.clone(), remote.text)
            .category(
                remote.properties.get("category").and_then(RemoteValue::as_str).unwrap_or("Other"),
                remote.category_relevance as f64,
            )
            .relevance(remote.relevance);

        if !remote.icon_name.is_empty() {
            builder = builder.icon(Icon::named(remote.icon_name));
        }
        if let Some(subtext) = remote.properties.get("subtext").and_then(RemoteValue::as_str) {
            builder = builder.subtext(subtext);
        }
        if let Some(urls) = remote.properties.get("urls").and_then(RemoteValue::as_list) {
            builder = builder.urls(urls.to_vec());
        }
        if let Some(multiline) = remote.properties.get("multiline").and_then(RemoteValue::as_bool) {
            builder = builder.multiline(multiline);
        }
        if let Some(image) = remote.properties.get("icon-data").and_then(RemoteValue::as_image) {
            builder = builder.icon(Icon::Inline(crate::icon::RemoteImage {
                width: image.width,
                height: image.height,
                row_stride: image.row_stride,
                has_alpha: image.has_alpha,
                bits_per_sample: image.bits_per_sample,
                channels: image.channels,
                data: image.data.clone(),
            }));
        }

        let origin: MatchData = Arc::new(service.to_string());
        builder = builder.data(origin);

        let cached_actions = self.actions_by_service.read().get(service).cloned().unwrap_or_default();
        for action in &cached_actions {
            builder = builder.action(action.clone());
        }

        let built = builder.build();
        match remote.properties.get("actions").and_then(RemoteValue::as_list) {
            Some(ids) => built.with_restricted_actions(ids),
            None => built,
        }
    }
}

impl Runner for IpcRunnerAdapter {
    fn metadata(&self) -> &RunnerMetadata {
        &self.metadata
    }

    fn match_query(&self, context: &RunnerContext) {
        let Some(self_arc) = self.runner_arc() else {
            log::warn!("{}: match_query called before attach_self", self.metadata.id);
            return;
        };

        let query = context.query().to_string();
        let result = self.handle.block_on(async {
            let services = self.matching_services().await;
            let calls = services.into_iter().map(|service| {
                let transport = self.transport.clone();
                async move {
                    let reply = transport.call(&service, &IpcRequest::Match { query: query.clone() }).await;
                    (service, reply)
                }
            });
            tokio::time::timeout(MATCH_TIMEOUT, futures::future::join_all(calls)).await
        });

        let Ok(replies) = result else {
            log::warn!("{}: match phase timed out waiting for remote services", self.metadata.id);
            return;
        };

        for (service, reply) in replies {
            if !context.is_valid() {
                return;
            }
            match reply {
                Ok(IpcReply::Matches(matches)) => {
                    let mut tags = self.origin_tags.write();
                    for remote in matches {
                        let built = self.to_query_match(&self_arc, &service, remote);
                        tags.insert(built.id().to_string(), OriginTag { service: service.clone() });
                        context.add_match(built);
                    }
                }
                Ok(_) => log::warn!("{}: service {service} replied with an unexpected message", self.metadata.id),
                Err(e) => log::debug!("{}: service {service} match call failed: {e}", self.metadata.id),
            }
        }
    }

    fn run(&self, _context: &RunnerContext, m: &QueryMatch, action: Option<&Action>) -> bool {
        let Some(service) = self.origin_tags.read().get(m.id()).map(|t| t.service.clone()) else {
            log::warn!("{}: run() on match {:?} with no known origin service", self.metadata.id, m.id());
            return false;
        };

        let local_id = if self.metadata.unique_results {
            m.id().to_string()
        } else {
            m.id()
                .strip_prefix(&format!("{}_", self.metadata.id))
                .map(str::to_string)
                .unwrap_or_else(|| m.id().to_string())
        };
        let action_id = action.map(|a| a.id().to_string()).unwrap_or_default();

        let transport = self.transport.clone();
        self.handle.block_on(transport.notify(&service, &IpcRequest::Run { match_id: local_id, action_id }));
        true
    }

    fn prepare(&self) {
        let already_requested = self.actions_requested.swap(true, std::sync::atomic::Ordering::SeqCst);
        if self.metadata.request_actions_once && already_requested {
            return;
        }
        self.handle.block_on(self.request_actions());
    }

    fn teardown(&self) {
        self.handle.block_on(async {
            for service in self.matching_services().await {
                self.transport.notify(&service, &IpcRequest::Teardown).await;
            }
        });
    }

    fn attach_self(&self, handle: Weak<dyn Runner>) {
        *self.self_handle.lock() = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::ipc::transport::MockTransport;
    use crate::ipc::wire::{RemoteConfig, RemoteMatch as Remote};

    fn load(transport: MockTransport, service: &str, rt: &tokio::runtime::Runtime) -> Arc<dyn Runner> {
        let adapter = IpcRunnerAdapter::new(RunnerMetadata::new("ipc", "IPC"), service, Arc::new(transport), rt.handle().clone()).unwrap();
        let arc: Arc<dyn Runner> = Arc::new(adapter);
        arc.attach_self(Arc::downgrade(&arc));
        arc
    }

    fn remote_match(id: &str, text: &str) -> Remote {
        Remote {
            id: id.to_string(),
            text: text.to_string(),
            icon_name: String::new(),
            category_relevance: 80,
            relevance: 0.5,
            properties: HashMap::new(),
        }
    }

    #[test]
    fn wildcard_fan_in_tags_each_match_with_its_service() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let transport = MockTransport::default();
        transport.register("org.example.one", |req| match req {
            IpcRequest::Match { .. } => IpcReply::Matches(vec![remote_match("a", "from one")]),
            IpcRequest::Config => IpcReply::Config(RemoteConfig {
                match_regex: None,
                min_letter_count: None,
                trigger_words: vec![],
                actions_requested_once: false,
            }),
            _ => IpcReply::Ack,
        });
        transport.register("org.example.two", |req| match req {
            IpcRequest::Match { .. } => IpcReply::Matches(vec![remote_match("b", "from two")]),
            _ => IpcReply::Ack,
        });

        let runner = load(transport, "org.example.*", &rt);
        let ctx = RunnerContext::new("foo", false, None);
        runner.match_query(&ctx);

        let matches = ctx.matches();
        assert_eq!(matches.len(), 2);
        let texts: std::collections::HashSet<_> = matches.iter().map(|m| m.text().to_string()).collect();
        assert!(texts.contains("from one"));
        assert!(texts.contains("from two"));
    }

    #[test]
    fn run_routes_back_to_originating_service() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let transport = MockTransport::default();
        let run_calls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let run_calls_clone = run_calls.clone();
        transport.register("org.example.svc", move |req| match req {
            IpcRequest::Match { .. } => IpcReply::Matches(vec![remote_match("x", "item")]),
            IpcRequest::Run { match_id, .. } => {
                run_calls_clone.lock().push(match_id.clone());
                IpcReply::Ack
            }
            _ => IpcReply::Ack,
        });

        let runner = load(transport, "org.example.svc", &rt);
        let ctx = RunnerContext::new("foo", false, None);
        runner.match_query(&ctx);
        let matches = ctx.matches();
        assert_eq!(matches.len(), 1);

        runner.run(&ctx, &matches[0], None);
        assert_eq!(run_calls.lock().as_slice(), ["x".to_string()]);
    }

    #[test]
    fn unparsable_match_regex_refuses_to_instantiate() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let transport = MockTransport::default();
        transport.register("org.example.broken", |req| match req {
            IpcRequest::Config => IpcReply::Config(RemoteConfig {
                match_regex: Some("(unclosed".to_string()),
                min_letter_count: None,
                trigger_words: vec![],
                actions_requested_once: false,
            }),
            _ => IpcReply::Ack,
        });

        let err = IpcRunnerAdapter::new(RunnerMetadata::new("broken", "Broken"), "org.example.broken", Arc::new(transport), rt.handle().clone())
            .unwrap_err();
        assert!(matches!(err, crate::error::DispatchError::InvalidMetadata { .. }));
    }
}
