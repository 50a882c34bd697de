//! Dispatch tables: routing incoming calls to handler thunks.
//!
//! Registration assigns each remotely-callable function a stable `u32`
//! table index carried on the wire as a `u64` dispatch id (id 0 is
//! reserved for portable calls). All peers must register their functions
//! in identical order so that ids align across the cluster, the same
//! assumption the framework already makes for distributed object ids.
//! Portable calls dispatch by name instead and survive binary skew.

use dashmap::DashMap;
use parking_lot::RwLock;

use graphmill_core::id::ProcId;

use crate::control::DistributedControl;
use crate::error::RpcError;
use crate::wire::PacketType;

/// A registered handler thunk: deserializes its arguments and runs.
pub type DispatchFn =
    Box<dyn Fn(&DistributedControl, ProcId, PacketType, &[u8]) -> Result<(), RpcError> + Send + Sync>;

/// Stable identifier assigned to a registered function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchId(pub u64);

impl DispatchId {
    /// The id as written on the wire.
    pub fn wire_id(self) -> u64 {
        self.0
    }
}

/// The id-indexed dispatch table for regular calls.
#[derive(Default)]
pub struct DispatchTable {
    thunks: RwLock<Vec<DispatchFn>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a thunk, assigning the next id. Ids start at 1; 0 is the
    /// portable marker.
    pub fn register(&self, thunk: DispatchFn) -> DispatchId {
        let mut thunks = self.thunks.write();
        thunks.push(thunk);
        DispatchId(thunks.len() as u64)
    }

    /// Invokes the thunk registered under `id`.
    pub fn invoke(
        &self,
        dc: &DistributedControl,
        id: u64,
        source: ProcId,
        packet: PacketType,
        args: &[u8],
    ) -> Result<(), RpcError> {
        let thunks = self.thunks.read();
        let index = id
            .checked_sub(1)
            .and_then(|i| usize::try_from(i).ok())
            .filter(|&i| i < thunks.len())
            .ok_or(RpcError::UnknownDispatch(id))?;
        thunks[index](dc, source, packet, args)
    }
}

/// The name-keyed tables for portable calls and requests.
#[derive(Default)]
pub struct PortableTable {
    calls: DashMap<String, DispatchFn>,
    requests: DashMap<String, DispatchFn>,
}

impl PortableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a portable call handler under `name`.
    pub fn register_call(&self, name: &str, thunk: DispatchFn) {
        self.calls.insert(name.to_string(), thunk);
    }

    /// Registers a portable request handler under `name`.
    pub fn register_request(&self, name: &str, thunk: DispatchFn) {
        self.requests.insert(name.to_string(), thunk);
    }

    /// Invokes the named handler from the call or request table.
    pub fn invoke(
        &self,
        dc: &DistributedControl,
        name: &str,
        is_request: bool,
        source: ProcId,
        packet: PacketType,
        args: &[u8],
    ) -> Result<(), RpcError> {
        let table = if is_request { &self.requests } else { &self.calls };
        let thunk = table
            .get(name)
            .ok_or_else(|| RpcError::UnknownPortable(name.to_string()))?;
        (thunk.value())(dc, source, packet, args)
    }
}
