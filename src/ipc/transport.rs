//! Abstract session-IPC transport: the adapter needs something to call
//! through, but the wire protocol to a real runner process is left to the
//! implementation.
//!
//! [`LocalSocketTransport`] is the one concrete, production-shaped
//! implementation, built on `interprocess`'s tokio integration
//! (`interprocess::local_socket::tokio::Listener` / `AsyncBufReadExt`).
//! [`MockTransport`] is an in-memory double for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use interprocess::local_socket::tokio::{RecvHalf, SendHalf, Stream as LocalSocketStream};
use interprocess::local_socket::{GenericNamespaced, ToNsName};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::{DispatchError, Result};
use crate::ipc::wire::{IpcReply, IpcRequest};

/// One line of newline-delimited `ron` is one request or reply. A real
/// session bus transport would frame on method names and object paths
/// instead; this is the minimal wire format the crate needs to exercise the
/// adapter end-to-end without a system IPC daemon.
#[async_trait]
pub trait IpcTransport: Send + Sync {
    /// Sends `request` to `service` and awaits its reply.
    async fn call(&self, service: &str, request: &IpcRequest) -> Result<IpcReply>;

    /// Sends `request` to `service` without waiting for a reply
    /// (fire-and-forget `Run`).
    async fn notify(&self, service: &str, request: &IpcRequest);

    /// Lists services currently known to match `prefix` (wildcard
    /// discovery).
    async fn registered_services(&self, prefix: &str) -> Vec<String>;
}

/// A transport over `interprocess` local sockets: each "service" name is a
/// socket name under the OS's local-socket namespace, one per remote
/// runner process.
pub struct LocalSocketTransport {
    known_services: Mutex<Vec<String>>,
}

impl LocalSocketTransport {
    /// Creates a transport that only talks to the given fixed set of
    /// service names (no wildcard discovery; the host is expected to
    /// register matching names itself via [`Self::add_service`]).
    pub fn new(services: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            known_services: Mutex::new(services.into_iter().map(Into::into).collect()),
        }
    }

    /// Registers a newly discovered service name.
    pub fn add_service(&self, service: impl Into<String>) {
        self.known_services.lock().push(service.into());
    }

    /// Deregisters a service name that has disappeared.
    pub fn remove_service(&self, service: &str) {
        self.known_services.lock().retain(|s| s != service);
    }

    async fn connect(service: &str) -> Result<LocalSocketStream> {
        let name = service
            .to_ns_name::<GenericNamespaced>()
            .map_err(|e| DispatchError::Config(format!("invalid service name {service:?}: {e}")))?;
        interprocess::local_socket::tokio::Stream::connect(name)
            .await
            .map_err(|e| DispatchError::Config(format!("connecting to {service}: {e}")))
    }

    async fn send_line(send: &mut SendHalf, request: &IpcRequest) -> Result<()> {
        let mut line = ron::to_string(request).map_err(|e| DispatchError::Config(e.to_string()))?;
        line.push('\n');
        send.write_all(line.as_bytes())
            .await
            .map_err(|e| DispatchError::Config(e.to_string()))
    }

    async fn read_reply(recv: RecvHalf) -> Result<IpcReply> {
        let mut reader = BufReader::new(recv);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| DispatchError::Config(e.to_string()))?;
        ron::from_str(line.trim_end()).map_err(|e| DispatchError::Config(format!("malformed reply: {e}")))
    }
}

#[async_trait]
impl IpcTransport for LocalSocketTransport {
    async fn call(&self, service: &str, request: &IpcRequest) -> Result<IpcReply> {
        let stream = Self::connect(service).await?;
        let (recv, mut send) = stream.split();
        Self::send_line(&mut send, request).await?;
        Self::read_reply(recv).await
    }

    async fn notify(&self, service: &str, request: &IpcRequest) {
        let Ok(stream) = Self::connect(service).await else {
            log::warn!("notify: {service} unreachable, dropping");
            return;
        };
        let (_recv, mut send) = stream.split();
        if let Err(e) = Self::send_line(&mut send, request).await {
            log::warn!("notify: writing to {service} failed: {e}");
        }
    }

    async fn registered_services(&self, prefix: &str) -> Vec<String> {
        self.known_services
            .lock()
            .iter()
            .filter(|s| s.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// An in-memory [`IpcTransport`] double: services are registered with
/// canned responders, no actual socket I/O happens. Used by the adapter's
/// own test suite and by `tests/ipc.rs`'s scenario S7.
#[derive(Default, Clone)]
pub struct MockTransport {
    services: Arc<Mutex<HashMap<String, Arc<dyn Fn(&IpcRequest) -> IpcReply + Send + Sync>>>>,
}

impl MockTransport {
    /// Registers `service`, answering every request with `responder`.
    pub fn register(&self, service: impl Into<String>, responder: impl Fn(&IpcRequest) -> IpcReply + Send + Sync + 'static) {
        self.services.lock().insert(service.into(), Arc::new(responder));
    }

    /// Deregisters `service`, simulating it disappearing mid-session.
    pub fn deregister(&self, service: &str) {
        self.services.lock().remove(service);
    }
}

#[async_trait]
impl IpcTransport for MockTransport {
    async fn call(&self, service: &str, request: &IpcRequest) -> Result<IpcReply> {
        let responder = self
            .services
            .lock()
            .get(service)
            .cloned()
            .ok_or_else(|| DispatchError::Config(format!("no such mock service: {service}")))?;
        Ok(responder(request))
    }

    async fn notify(&self, service: &str, request: &IpcRequest) {
        if let Some(responder) = self.services.lock().get(service).cloned() {
            responder(request);
        }
    }

    async fn registered_services(&self, prefix: &str) -> Vec<String> {
        self.services
            .lock()
            .keys()
            .filter(|s| s.starts_with(prefix))
            .cloned()
            .collect()
    }
}
