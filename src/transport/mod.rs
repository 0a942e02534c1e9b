//! Remote invocation of [`RingService`] operations.
//!
//! A [`Transport`] exposes a node's operation set at the node's address and
//! hands out proxies for remote addresses. Calls on a proxy run the same
//! operation on the remote node; transport failures surface as
//! [`RingError::RemoteCallFailure`](crate::RingError::RemoteCallFailure).
//!
//! - [`TcpTransport`]: length-prefixed `bincode` frames over TCP.
//! - [`LocalNetwork`]: in-process registry of nodes, for tests and for
//!   embedding several nodes in one process.

mod local;
mod message;
mod tcp;

use {
    crate::{identity::NodeIdentity, service::RingService},
    std::{sync::Arc, time::Duration},
    tokio::{sync::oneshot, task::JoinHandle},
};

pub use {
    local::LocalNetwork,
    tcp::{DEFAULT_REQUEST_TIMEOUT, TcpTransport},
};

/// Remote-invocation boundary of a node.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Starts accepting calls for `service` at the address of `identity`.
    ///
    /// Calls are served until the returned handle is stopped or dropped.
    async fn serve(
        &self,
        identity: &NodeIdentity,
        service: Arc<dyn RingService>,
    ) -> Result<ServerHandle, TransportError>;

    /// Returns a proxy for the node at the address of `peer`.
    ///
    /// Connecting is lazy: an unreachable peer is reported by the calls made
    /// on the proxy, not here.
    fn connect(&self, peer: &NodeIdentity) -> Arc<dyn RingService>;
}

/// Handle of a running listener.
#[derive(Debug)]
pub struct ServerHandle {
    addr: String,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub(crate) fn new(addr: String, shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            addr,
            shutdown,
            task,
        }
    }

    /// Address the listener is bound to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Stops accepting calls and waits for the listener to wind down.
    pub async fn stop(self) {
        // The listener also stops if the sender is gone, so a failed send
        // needs no handling.
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Could not start listening.
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// The address is already being served.
    #[error("Address {addr} is already served")]
    AlreadyServed { addr: String },

    /// Network I/O failure.
    #[error("I/O error talking to {peer}: {source}")]
    Io {
        peer: String,
        source: std::io::Error,
    },

    /// Frame could not be encoded or decoded.
    #[error("Malformed frame from {peer}: {reason}")]
    Codec { peer: String, reason: String },

    /// Frame exceeds the size limit.
    #[error("Frame of {len} bytes from {peer} exceeds the limit")]
    FrameTooLarge { peer: String, len: usize },

    /// Connected peer did not send its request in time.
    #[error("No request from {peer} within {after:?}")]
    RequestTimeout { peer: String, after: Duration },

    /// Nothing is served at the address.
    #[error("Peer {peer} is unreachable")]
    Unreachable { peer: String },

    /// Peer answered with a response of the wrong kind.
    #[error("Unexpected response from {peer}")]
    UnexpectedResponse { peer: String },
}

impl TransportError {
    /// Address of the peer (or local listener) involved.
    pub fn peer(&self) -> &str {
        match self {
            TransportError::Bind { addr, .. } | TransportError::AlreadyServed { addr } => addr,
            TransportError::Io { peer, .. }
            | TransportError::Codec { peer, .. }
            | TransportError::FrameTooLarge { peer, .. }
            | TransportError::RequestTimeout { peer, .. }
            | TransportError::Unreachable { peer }
            | TransportError::UnexpectedResponse { peer } => peer,
        }
    }
}
