//! Sharded key/value store with local delta aggregation.
//!
//! Every key deterministically hashes to an owning process, which holds
//! the authoritative value. Writes are deltas merged into a local pending
//! table and flushed to owners in batched RPCs when a per-key counter
//! crosses the flush threshold or an explicit flush runs. Reads return
//! the owner's snapshot, pending local deltas excluded.
//!
//! The merge operator must be associative and commutative; deltas from
//! different processes arrive in no particular order.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use graphmill_core::id::ProcId;

use crate::control::DistributedControl;
use crate::error::RpcError;
use crate::object::{DistObject, ObjectPort};
use crate::wire::PacketType;

/// Member id: batched deltas to merge into the authoritative shard.
const MEMBER_APPLY_DELTAS: u32 = 0;
/// Member id: snapshot request carrying a reply id.
const MEMBER_GET: u32 = 1;

/// Deltas accumulated for this many distinct writes flush automatically.
pub const DEFAULT_FLUSH_THRESHOLD: u32 = 64;

/// A distributed hash table with delta aggregation.
pub struct DeltaDht<K, V> {
    port: ObjectPort,
    merge: fn(&mut V, V),
    /// Authoritative values for keys this process owns.
    owned: DashMap<K, V>,
    /// Locally accumulated deltas per remote-owned key, with a write
    /// count driving threshold flushes.
    pending: DashMap<K, (V, u32)>,
    flush_threshold: u32,
}

impl<K, V> DeltaDht<K, V>
where
    K: Serialize + DeserializeOwned + Hash + Eq + Clone + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static,
{
    /// Creates and registers a DHT over the given control plane.
    ///
    /// Every process must create its DHTs in the same order, with the
    /// same merge operator.
    pub fn new(dc: &DistributedControl, merge: fn(&mut V, V)) -> Arc<Self> {
        Self::with_flush_threshold(dc, merge, DEFAULT_FLUSH_THRESHOLD)
    }

    /// Creates a DHT with a custom flush threshold.
    pub fn with_flush_threshold(
        dc: &DistributedControl,
        merge: fn(&mut V, V),
        flush_threshold: u32,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let object_id = dc.register_object(weak.clone() as Weak<dyn DistObject>);
            DeltaDht {
                port: ObjectPort::new(dc.clone(), object_id),
                merge,
                owned: DashMap::new(),
                pending: DashMap::new(),
                flush_threshold: flush_threshold.max(1),
            }
        })
    }

    /// The process owning `key`.
    pub fn owner(&self, key: &K) -> ProcId {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        ProcId((hasher.finish() % self.port.dc().numprocs() as u64) as u32)
    }

    /// Whether this process owns `key`.
    pub fn is_local(&self, key: &K) -> bool {
        self.owner(key) == self.port.dc().procid()
    }

    /// Reads the owner's snapshot of `key`, defaulting when absent.
    pub fn get(&self, key: &K) -> Result<V, RpcError> {
        let owner = self.owner(key);
        if owner == self.port.dc().procid() {
            return Ok(self
                .owned
                .get(key)
                .map(|entry| entry.value().clone())
                .unwrap_or_default());
        }
        let (reply_id, slot) = self.port.dc().create_reply_slot();
        self.port
            .remote_call(owner, MEMBER_GET, &(reply_id, key.clone()))?;
        let blob = slot.wait();
        bincode::deserialize(&blob).map_err(RpcError::from)
    }

    /// Merges a delta into `key`.
    ///
    /// Locally owned keys merge straight into the authoritative value;
    /// remote keys accumulate in the pending table until a flush.
    pub fn accumulate(&self, key: K, delta: V) -> Result<(), RpcError> {
        let owner = self.owner(&key);
        if owner == self.port.dc().procid() {
            let mut entry = self.owned.entry(key).or_default();
            (self.merge)(entry.value_mut(), delta);
            return Ok(());
        }
        let flush_now = {
            let mut entry = self.pending.entry(key.clone()).or_default();
            let (accumulated, writes) = entry.value_mut();
            (self.merge)(accumulated, delta);
            *writes += 1;
            *writes >= self.flush_threshold
        };
        if flush_now {
            if let Some((key, (delta, _))) = self.pending.remove(&key) {
                self.port
                    .remote_call(owner, MEMBER_APPLY_DELTAS, &vec![(key, delta)])?;
            }
        }
        Ok(())
    }

    /// Flushes every pending delta to its owner in per-owner batches.
    pub fn flush(&self) -> Result<(), RpcError> {
        let keys: Vec<K> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut batches: HashMap<ProcId, Vec<(K, V)>> = HashMap::new();
        for key in keys {
            if let Some((key, (delta, _))) = self.pending.remove(&key) {
                batches.entry(self.owner(&key)).or_default().push((key, delta));
            }
        }
        for (owner, batch) in batches {
            self.port.remote_call(owner, MEMBER_APPLY_DELTAS, &batch)?;
        }
        Ok(())
    }

    /// Flushes pending deltas, then runs the cluster-wide barrier. After
    /// every process returns, each owner's value equals the fold of all
    /// deltas issued before the barrier.
    pub fn full_barrier(&self) -> Result<(), RpcError> {
        self.flush()?;
        self.port.dc().full_barrier()
    }

    /// Number of keys owned locally with a materialized value.
    pub fn num_owned(&self) -> usize {
        self.owned.len()
    }

    fn apply_batch(&self, batch: Vec<(K, V)>) {
        for (key, delta) in batch {
            let mut entry = self.owned.entry(key).or_default();
            (self.merge)(entry.value_mut(), delta);
        }
    }
}

impl<K, V> DistObject for DeltaDht<K, V>
where
    K: Serialize + DeserializeOwned + Hash + Eq + Clone + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Clone + Default + Send + Sync + 'static,
{
    fn port(&self) -> &ObjectPort {
        &self.port
    }

    fn dispatch_member(
        &self,
        dc: &DistributedControl,
        source: ProcId,
        _packet: PacketType,
        member: u32,
        args: &[u8],
    ) -> Result<(), RpcError> {
        match member {
            MEMBER_APPLY_DELTAS => {
                let batch: Vec<(K, V)> = bincode::deserialize(args)?;
                self.apply_batch(batch);
                Ok(())
            }
            MEMBER_GET => {
                let (reply_id, key): (u64, K) = bincode::deserialize(args)?;
                let value = self
                    .owned
                    .get(&key)
                    .map(|entry| entry.value().clone())
                    .unwrap_or_default();
                dc.send_reply(source, reply_id, bincode::serialize(&value)?)
            }
            other => Err(RpcError::UnknownMember {
                object: self.port.object_id(),
                member: other,
            }),
        }
    }
}
