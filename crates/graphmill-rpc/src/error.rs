//! Error types for the RPC substrate.

use graphmill_core::id::ProcId;
use thiserror::Error;

/// Errors produced by the RPC layer.
///
/// Transport and deserialization failures are logged where they occur and
/// propagated to the control layer, which aborts the engine with a fatal
/// status.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A payload failed to serialize or deserialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A frame header or payload was structurally invalid.
    #[error("malformed frame from {source_proc}")]
    MalformedFrame { source_proc: ProcId },

    /// A call referenced a dispatch id nobody registered.
    #[error("unknown dispatch id {0}")]
    UnknownDispatch(u64),

    /// A portable call referenced an unregistered name.
    #[error("unknown portable function '{0}'")]
    UnknownPortable(String),

    /// A call targeted a distributed object id nobody registered, or one
    /// that has been torn down.
    #[error("unknown distributed object {0}")]
    UnknownObject(u64),

    /// A call targeted a member id the object does not implement.
    #[error("object {object} has no member {member}")]
    UnknownMember { object: u64, member: u32 },

    /// A send targeted a rank outside the cluster.
    #[error("invalid peer {0}")]
    InvalidPeer(ProcId),

    /// The control plane is shutting down.
    #[error("rpc layer is shut down")]
    Shutdown,
}
