//! Distributed objects: cluster-wide objects addressable by stable id.
//!
//! A distributed object registers itself with the control plane during
//! construction and receives the next object id; because every peer must
//! construct its distributed objects in identical order, the ids line up
//! across the cluster and a member call `{object_id, member_id, args}`
//! lands on the peer's twin. The control plane holds only weak handles;
//! the application owns the objects and the control plane and tears them
//! down in a fixed order.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};
use serde::de::DeserializeOwned;
use serde::Serialize;

use graphmill_core::id::ProcId;

use crate::control::DistributedControl;
use crate::error::RpcError;
use crate::wire::PacketType;

/// Reserved member id for the matched send/receive rendezvous.
pub(crate) const MEMBER_SEND_TO: u32 = u32::MAX;

/// The contract a distributed object implements to receive member calls.
pub trait DistObject: Send + Sync {
    /// The object's RPC port.
    fn port(&self) -> &ObjectPort;

    /// Routes an incoming member call.
    fn dispatch_member(
        &self,
        dc: &DistributedControl,
        source: ProcId,
        packet: PacketType,
        member: u32,
        args: &[u8],
    ) -> Result<(), RpcError>;
}

/// A blob parked by a peer's `send_to`, waiting for `recv_from`.
struct RecvSlot {
    inner: Mutex<Option<(Vec<u8>, u64)>>,
    cond: Condvar,
}

impl RecvSlot {
    fn new() -> Self {
        RecvSlot {
            inner: Mutex::new(None),
            cond: Condvar::new(),
        }
    }
}

/// Per-object RPC state: the object id, call counters, and the matched
/// send/receive slots.
pub struct ObjectPort {
    dc: DistributedControl,
    object_id: u64,
    calls_sent: AtomicU64,
    calls_received: AtomicU64,
    recv_slots: Vec<RecvSlot>,
}

impl ObjectPort {
    /// A port for the object registered under `object_id`.
    pub fn new(dc: DistributedControl, object_id: u64) -> Self {
        let n = dc.numprocs();
        ObjectPort {
            dc,
            object_id,
            calls_sent: AtomicU64::new(0),
            calls_received: AtomicU64::new(0),
            recv_slots: (0..n).map(|_| RecvSlot::new()).collect(),
        }
    }

    /// The control plane this object is registered with.
    pub fn dc(&self) -> &DistributedControl {
        &self.dc
    }

    /// The object's cluster-wide id.
    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    /// Member calls this object has issued.
    pub fn calls_sent(&self) -> u64 {
        self.calls_sent.load(Ordering::SeqCst)
    }

    /// Member calls this object has received.
    pub fn calls_received(&self) -> u64 {
        self.calls_received.load(Ordering::SeqCst)
    }

    pub(crate) fn inc_calls_received(&self) {
        self.calls_received.fetch_add(1, Ordering::SeqCst);
    }

    /// Issues a member call dispatched through the target's handler pool.
    pub fn remote_call<A: Serialize>(
        &self,
        target: ProcId,
        member: u32,
        args: &A,
    ) -> Result<(), RpcError> {
        self.calls_sent.fetch_add(1, Ordering::SeqCst);
        self.dc
            .object_call(target, self.object_id, member, args, PacketType::Call)
    }

    /// Issues a member call executed inline on the target's receive
    /// thread.
    pub fn fast_remote_call<A: Serialize>(
        &self,
        target: ProcId,
        member: u32,
        args: &A,
    ) -> Result<(), RpcError> {
        self.calls_sent.fetch_add(1, Ordering::SeqCst);
        self.dc
            .object_call(target, self.object_id, member, args, PacketType::FastCall)
    }

    /// Issues a framework-internal member call, excluded from counters.
    pub fn control_call<A: Serialize>(
        &self,
        target: ProcId,
        member: u32,
        args: &A,
    ) -> Result<(), RpcError> {
        self.dc
            .object_call(target, self.object_id, member, args, PacketType::Control)
    }

    /// Matched send: blocks until the target's twin consumes the value
    /// with [`recv_from`](Self::recv_from).
    pub fn send_to<T: Serialize>(&self, target: ProcId, value: &T) -> Result<(), RpcError> {
        let blob = bincode::serialize(value)?;
        let (reply_id, slot) = self.dc.create_reply_slot();
        self.calls_sent.fetch_add(1, Ordering::SeqCst);
        self.control_call(target, MEMBER_SEND_TO, &(blob, reply_id))?;
        // Released only when the consumer has taken the value.
        slot.wait();
        Ok(())
    }

    /// Matched receive: blocks until the source's twin sends a value,
    /// consumes it, and releases the sender.
    pub fn recv_from<T: DeserializeOwned>(&self, source: ProcId) -> Result<T, RpcError> {
        let slot = self
            .recv_slots
            .get(source.index())
            .ok_or(RpcError::InvalidPeer(source))?;
        let (blob, reply_id) = {
            let mut inner = slot.inner.lock();
            loop {
                if let Some(parked) = inner.take() {
                    break parked;
                }
                slot.cond.wait(&mut inner);
            }
        };
        self.calls_received.fetch_add(1, Ordering::SeqCst);
        self.dc.send_reply(source, reply_id, Vec::new())?;
        bincode::deserialize(&blob).map_err(RpcError::from)
    }

    /// Parks an incoming `send_to` blob for this object.
    pub(crate) fn handle_send_to(&self, source: ProcId, args: &[u8]) -> Result<(), RpcError> {
        let (blob, reply_id): (Vec<u8>, u64) = bincode::deserialize(args)?;
        let slot = self
            .recv_slots
            .get(source.index())
            .ok_or(RpcError::InvalidPeer(source))?;
        let mut inner = slot.inner.lock();
        // A second send_to from the same source waits for its own reply
        // before issuing, so the slot can hold at most one value.
        debug_assert!(inner.is_none());
        *inner = Some((blob, reply_id));
        slot.cond.notify_one();
        Ok(())
    }
}
