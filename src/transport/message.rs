//! Wire messages and framing.
//!
//! Every call is a single `Request` frame answered by a single `Response`
//! frame. A frame is a 4-byte big-endian length followed by the
//! `bincode`-encoded message.

use {
    super::TransportError,
    crate::{
        RingError,
        RingResult,
        identity::NodeIdentity,
        ring::RingPos,
        service::{JoinResponse, MembershipChange, Operation, RingService},
    },
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};

/// Frames larger than this are rejected.
pub(crate) const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// A call of a [`RingService`] operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Request {
    Exec {
        key: String,
        value: Option<String>,
        op: Operation,
    },
    GetSuccessor {
        hash: RingPos,
    },
    GetPredecessorOf {
        hash: RingPos,
    },
    JoinRing {
        joining: NodeIdentity,
    },
    LeaveRing {
        leaving: NodeIdentity,
        predecessor: Option<NodeIdentity>,
    },
    ChangePredecessor {
        predecessor: NodeIdentity,
    },
    UpdateMembership {
        change: MembershipChange,
        identity: NodeIdentity,
    },
    RemoteSnapshot,
    Predecessor,
    Successor,
    Membership,
}

/// Outcome of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Response {
    Value(Option<String>),
    Identity(NodeIdentity),
    MaybeIdentity(Option<NodeIdentity>),
    Joined(JoinResponse),
    Entries(Vec<(String, String)>),
    Members(Vec<NodeIdentity>),
    Done,
    Failed(RingError),
}

impl Response {
    fn from_result<T>(result: RingResult<T>, ok: impl FnOnce(T) -> Response) -> Response {
        match result {
            Ok(value) => ok(value),
            Err(err) => Response::Failed(err),
        }
    }
}

/// Runs a request against the local service.
pub(crate) async fn dispatch(service: &dyn RingService, request: Request) -> Response {
    match request {
        Request::Exec { key, value, op } => {
            Response::from_result(service.exec(key, value, op).await, Response::Value)
        }
        Request::GetSuccessor { hash } => {
            Response::from_result(service.get_successor(hash).await, Response::Identity)
        }
        Request::GetPredecessorOf { hash } => Response::from_result(
            service.get_predecessor_of(hash).await,
            Response::MaybeIdentity,
        ),
        Request::JoinRing { joining } => {
            Response::from_result(service.join_ring(joining).await, Response::Joined)
        }
        Request::LeaveRing {
            leaving,
            predecessor,
        } => Response::from_result(service.leave_ring(leaving, predecessor).await, |()| {
            Response::Done
        }),
        Request::ChangePredecessor { predecessor } => Response::from_result(
            service.change_predecessor(predecessor).await,
            Response::MaybeIdentity,
        ),
        Request::UpdateMembership { change, identity } => Response::from_result(
            service.update_membership(change, identity).await,
            |()| Response::Done,
        ),
        Request::RemoteSnapshot => {
            Response::from_result(service.remote_snapshot().await, Response::Entries)
        }
        Request::Predecessor => {
            Response::from_result(service.predecessor().await, Response::MaybeIdentity)
        }
        Request::Successor => {
            Response::from_result(service.successor().await, Response::MaybeIdentity)
        }
        Request::Membership => {
            Response::from_result(service.membership().await, Response::Members)
        }
    }
}

/// Writes a length-prefixed frame.
pub(crate) async fn write_frame<W, T>(writer: &mut W, msg: &T, peer: &str) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = bincode::serialize(msg).map_err(|e| TransportError::Codec {
        peer: peer.to_string(),
        reason: e.to_string(),
    })?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            peer: peer.to_string(),
            len: data.len(),
        });
    }

    let io_err = |source: std::io::Error| TransportError::Io {
        peer: peer.to_string(),
        source,
    };
    writer
        .write_all(&(data.len() as u32).to_be_bytes())
        .await
        .map_err(io_err)?;
    writer.write_all(&data).await.map_err(io_err)?;
    writer.flush().await.map_err(io_err)
}

/// Reads a length-prefixed frame.
pub(crate) async fn read_frame<R, T>(reader: &mut R, peer: &str) -> Result<T, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let io_err = |source: std::io::Error| TransportError::Io {
        peer: peer.to_string(),
        source,
    };

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(io_err)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            peer: peer.to_string(),
            len,
        });
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await.map_err(io_err)?;
    bincode::deserialize(&data).map_err(|e| TransportError::Codec {
        peer: peer.to_string(),
        reason: e.to_string(),
    })
}
