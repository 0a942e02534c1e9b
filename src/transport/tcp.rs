use {
    super::{
        ServerHandle,
        Transport,
        TransportError,
        message::{Request, Response, dispatch, read_frame, write_frame},
    },
    crate::{
        RingError,
        RingResult,
        identity::NodeIdentity,
        ring::RingPos,
        service::{JoinResponse, MembershipChange, Operation, RingService},
    },
    std::{sync::Arc, time::Duration},
    tokio::{
        net::{TcpListener, TcpStream},
        sync::oneshot,
        task::JoinSet,
    },
    tracing::{debug, error, info},
};

/// How long an accepted connection may take to deliver its request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP transport.
///
/// Each node listens on its `host:port`. Every call opens a connection,
/// sends one request frame and reads one response frame.
///
/// Connections that do not deliver a request within the request timeout are
/// dropped. Stopping the listener also drops every connection still being
/// served.
#[derive(Debug, Clone, Copy)]
pub struct TcpTransport {
    request_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn serve(
        &self,
        identity: &NodeIdentity,
        service: Arc<dyn RingService>,
    ) -> Result<ServerHandle, TransportError> {
        let addr = identity.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!(%addr, "ring node listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(
            listener,
            service,
            self.request_timeout,
            shutdown_rx,
        ));
        Ok(ServerHandle::new(addr, shutdown_tx, task))
    }

    fn connect(&self, peer: &NodeIdentity) -> Arc<dyn RingService> {
        Arc::new(TcpPeer { addr: peer.addr() })
    }
}

async fn accept_loop(
    listener: TcpListener,
    service: Arc<dyn RingService>,
    request_timeout: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let service = service.clone();
                    connections.spawn(async move {
                        let peer = peer.to_string();
                        if let Err(e) = handle_connection(stream, service, &peer, request_timeout).await {
                            debug!(%peer, error = %e, "connection handler error");
                        }
                    });
                }
                Err(e) => error!(error = %e, "failed to accept connection"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = &mut shutdown => {
                info!(in_flight = connections.len(), "ring node listener shutting down");
                break;
            }
        }
    }
    connections.shutdown().await;
}

async fn handle_connection(
    mut stream: TcpStream,
    service: Arc<dyn RingService>,
    peer: &str,
    request_timeout: Duration,
) -> Result<(), TransportError> {
    let request: Request = tokio::time::timeout(request_timeout, read_frame(&mut stream, peer))
        .await
        .map_err(|_| TransportError::RequestTimeout {
            peer: peer.to_string(),
            after: request_timeout,
        })??;
    let response = dispatch(service.as_ref(), request).await;
    write_frame(&mut stream, &response, peer).await
}

/// Proxy for a node reachable over TCP.
struct TcpPeer {
    addr: String,
}

impl TcpPeer {
    async fn call(&self, request: Request) -> RingResult<Response> {
        let mut stream =
            TcpStream::connect(&self.addr)
                .await
                .map_err(|source| TransportError::Io {
                    peer: self.addr.clone(),
                    source,
                })?;
        write_frame(&mut stream, &request, &self.addr).await?;
        match read_frame(&mut stream, &self.addr).await? {
            Response::Failed(err) => Err(err),
            response => Ok(response),
        }
    }

    fn unexpected(&self) -> RingError {
        TransportError::UnexpectedResponse {
            peer: self.addr.clone(),
        }
        .into()
    }
}

#[async_trait::async_trait]
impl RingService for TcpPeer {
    async fn exec(
        &self,
        key: String,
        value: Option<String>,
        op: Operation,
    ) -> RingResult<Option<String>> {
        match self.call(Request::Exec { key, value, op }).await? {
            Response::Value(value) => Ok(value),
            _ => Err(self.unexpected()),
        }
    }

    async fn get_successor(&self, hash: RingPos) -> RingResult<NodeIdentity> {
        match self.call(Request::GetSuccessor { hash }).await? {
            Response::Identity(identity) => Ok(identity),
            _ => Err(self.unexpected()),
        }
    }

    async fn get_predecessor_of(&self, hash: RingPos) -> RingResult<Option<NodeIdentity>> {
        match self.call(Request::GetPredecessorOf { hash }).await? {
            Response::MaybeIdentity(predecessor) => Ok(predecessor),
            _ => Err(self.unexpected()),
        }
    }

    async fn join_ring(&self, joining: NodeIdentity) -> RingResult<JoinResponse> {
        match self.call(Request::JoinRing { joining }).await? {
            Response::Joined(response) => Ok(response),
            _ => Err(self.unexpected()),
        }
    }

    async fn leave_ring(
        &self,
        leaving: NodeIdentity,
        predecessor: Option<NodeIdentity>,
    ) -> RingResult<()> {
        match self
            .call(Request::LeaveRing {
                leaving,
                predecessor,
            })
            .await?
        {
            Response::Done => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    async fn change_predecessor(
        &self,
        predecessor: NodeIdentity,
    ) -> RingResult<Option<NodeIdentity>> {
        match self.call(Request::ChangePredecessor { predecessor }).await? {
            Response::MaybeIdentity(previous) => Ok(previous),
            _ => Err(self.unexpected()),
        }
    }

    async fn update_membership(
        &self,
        change: MembershipChange,
        identity: NodeIdentity,
    ) -> RingResult<()> {
        match self
            .call(Request::UpdateMembership { change, identity })
            .await?
        {
            Response::Done => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    async fn remote_snapshot(&self) -> RingResult<Vec<(String, String)>> {
        match self.call(Request::RemoteSnapshot).await? {
            Response::Entries(entries) => Ok(entries),
            _ => Err(self.unexpected()),
        }
    }

    async fn predecessor(&self) -> RingResult<Option<NodeIdentity>> {
        match self.call(Request::Predecessor).await? {
            Response::MaybeIdentity(predecessor) => Ok(predecessor),
            _ => Err(self.unexpected()),
        }
    }

    async fn successor(&self) -> RingResult<Option<NodeIdentity>> {
        match self.call(Request::Successor).await? {
            Response::MaybeIdentity(successor) => Ok(successor),
            _ => Err(self.unexpected()),
        }
    }

    async fn membership(&self) -> RingResult<Vec<NodeIdentity>> {
        match self.call(Request::Membership).await? {
            Response::Members(members) => Ok(members),
            _ => Err(self.unexpected()),
        }
    }
}
