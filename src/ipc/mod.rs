//! Out-of-process runner support.

pub mod adapter;
pub mod transport;
pub mod wire;

pub use adapter::IpcRunnerAdapter;
pub use transport::{IpcTransport, LocalSocketTransport, MockTransport};
pub use wire::{IpcReply, IpcRequest, RemoteAction, RemoteConfig, RemoteImage, RemoteMatch, RemoteValue};
