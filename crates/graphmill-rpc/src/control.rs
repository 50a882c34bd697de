//! The distributed control plane.
//!
//! A [`DistributedControl`] owns the transport, one sender and one
//! receiver per peer, the function-call queue with its pool of dispatch
//! handler threads, the regular and portable dispatch tables, the
//! distributed-object registry, and the barrier service. It is cheaply
//! cloneable; all clones share one control plane.
//!
//! Builtin dispatch entries (reply delivery, object routing, barrier
//! coordination) are registered during construction, before any user
//! registration, so user dispatch ids line up across peers as long as
//! user registrations happen in identical order everywhere.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use graphmill_core::id::ProcId;
use graphmill_core::queue::BlockingQueue;

use crate::comm::Comm;
use crate::dispatch::{DispatchId, DispatchTable, PortableTable};
use crate::error::RpcError;
use crate::object::{DistObject, MEMBER_SEND_TO};
use crate::receiver::Receiver;
use crate::sender::{BufferedStreamSender, Sender, StreamSender, DEFAULT_BUFFER_THRESHOLD};
use crate::services::BarrierService;
use crate::wire::{encode_call, split_call, split_portable, PacketType, PORTABLE_DISPATCH_ID};

/// Construction options for a control plane.
#[derive(Debug, Clone)]
pub struct ControlOptions {
    /// Threads in the deferred-dispatch handler pool.
    pub handler_threads: usize,
    /// Use coalescing senders instead of flush-per-call senders.
    pub buffered_send: bool,
    /// Coalescing threshold for buffered senders.
    pub buffer_threshold: usize,
}

impl Default for ControlOptions {
    fn default() -> Self {
        ControlOptions {
            handler_threads: 2,
            buffered_send: false,
            buffer_threshold: DEFAULT_BUFFER_THRESHOLD,
        }
    }
}

/// A deferred call pulled off the wire, awaiting a handler thread.
struct FunctionCall {
    source: ProcId,
    payload: Vec<u8>,
}

/// One half of a request/reply rendezvous.
pub struct ReplySlot {
    data: Mutex<Option<Vec<u8>>>,
    cond: Condvar,
}

impl ReplySlot {
    fn new() -> Arc<Self> {
        Arc::new(ReplySlot {
            data: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    fn fill(&self, bytes: Vec<u8>) {
        let mut data = self.data.lock();
        *data = Some(bytes);
        self.cond.notify_one();
    }

    /// Blocks until the reply arrives.
    pub fn wait(&self) -> Vec<u8> {
        let mut data = self.data.lock();
        loop {
            if let Some(bytes) = data.take() {
                return bytes;
            }
            self.cond.wait(&mut data);
        }
    }
}

struct BuiltinIds {
    reply: DispatchId,
    object: DispatchId,
    barrier_enter: DispatchId,
    barrier_release: DispatchId,
}

struct ControlInner {
    comm: Arc<dyn Comm>,
    senders: Vec<Box<dyn Sender>>,
    receivers: Vec<Receiver>,
    fcall_queue: BlockingQueue<FunctionCall>,
    handler_threads: Mutex<Vec<JoinHandle<()>>>,
    dispatch: DispatchTable,
    portable: PortableTable,
    objects: RwLock<Vec<Weak<dyn DistObject>>>,
    reply_slots: DashMap<u64, Arc<ReplySlot>>,
    next_reply_id: AtomicU64,
    barrier: BarrierService,
    builtins: BuiltinIds,
    /// User calls sent and fully processed; the barrier's quiescence test.
    calls_sent: AtomicU64,
    calls_received: AtomicU64,
    calls_processed: AtomicU64,
    healthy: AtomicBool,
    shutdown: AtomicBool,
}

/// The control plane for one process of the cluster.
#[derive(Clone)]
pub struct DistributedControl {
    inner: Arc<ControlInner>,
}

impl DistributedControl {
    /// Builds the control plane over a connected transport and starts the
    /// receive and handler threads.
    pub fn new(comm: Arc<dyn Comm>, options: ControlOptions) -> Result<Self, RpcError> {
        let n = comm.numprocs();
        let senders: Vec<Box<dyn Sender>> = (0..n)
            .map(|p| -> Box<dyn Sender> {
                if options.buffered_send {
                    Box::new(BufferedStreamSender::new(
                        Arc::clone(&comm),
                        ProcId(p as u32),
                        options.buffer_threshold,
                    ))
                } else {
                    Box::new(StreamSender::new(Arc::clone(&comm), ProcId(p as u32)))
                }
            })
            .collect();
        let receivers = (0..n).map(|p| Receiver::new(ProcId(p as u32))).collect();

        let dispatch = DispatchTable::new();
        let builtins = BuiltinIds {
            reply: dispatch.register(Box::new(reply_thunk)),
            object: dispatch.register(Box::new(object_thunk)),
            barrier_enter: dispatch.register(Box::new(barrier_enter_thunk)),
            barrier_release: dispatch.register(Box::new(barrier_release_thunk)),
        };

        let control = DistributedControl {
            inner: Arc::new(ControlInner {
                comm: Arc::clone(&comm),
                senders,
                receivers,
                fcall_queue: BlockingQueue::new(),
                handler_threads: Mutex::new(Vec::new()),
                dispatch,
                portable: PortableTable::new(),
                objects: RwLock::new(Vec::new()),
                reply_slots: DashMap::new(),
                next_reply_id: AtomicU64::new(0),
                barrier: BarrierService::new(),
                builtins,
                calls_sent: AtomicU64::new(0),
                calls_received: AtomicU64::new(0),
                calls_processed: AtomicU64::new(0),
                healthy: AtomicBool::new(true),
                shutdown: AtomicBool::new(false),
            }),
        };

        let recv_control = control.clone();
        comm.start(Arc::new(move |source, bytes| {
            recv_control.inner.receivers[source.index()].incoming_data(&recv_control, bytes);
        }))?;

        let mut handles = control.inner.handler_threads.lock();
        for _ in 0..options.handler_threads.max(1) {
            let worker = control.clone();
            handles.push(thread::spawn(move || worker.handler_loop()));
        }
        drop(handles);

        tracing::info!(
            rank = control.procid().0,
            peers = n,
            buffered = options.buffered_send,
            "distributed control initialized"
        );
        Ok(control)
    }

    /// This process's rank.
    pub fn procid(&self) -> ProcId {
        self.inner.comm.procid()
    }

    /// Number of processes in the cluster.
    pub fn numprocs(&self) -> usize {
        self.inner.comm.numprocs()
    }

    /// User calls sent by this process.
    pub fn calls_sent(&self) -> u64 {
        self.inner.calls_sent.load(Ordering::SeqCst)
    }

    /// User calls received by this process.
    pub fn calls_received(&self) -> u64 {
        self.inner.calls_received.load(Ordering::SeqCst)
    }

    /// False once a transport failure has been observed; the engine layer
    /// treats an unhealthy control plane as fatal.
    pub fn is_healthy(&self) -> bool {
        self.inner.healthy.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------

    /// Registers a call handler, returning its dispatch id. All peers
    /// must register handlers in identical order.
    pub fn register_handler<A, F>(&self, handler: F) -> DispatchId
    where
        A: DeserializeOwned,
        F: Fn(&DistributedControl, ProcId, A) + Send + Sync + 'static,
    {
        self.inner.dispatch.register(Box::new(move |dc, source, _packet, args| {
            let args: A = bincode::deserialize(args)?;
            handler(dc, source, args);
            Ok(())
        }))
    }

    /// Registers a portable (name-dispatched) call handler.
    pub fn register_portable<A, F>(&self, name: &str, handler: F)
    where
        A: DeserializeOwned,
        F: Fn(&DistributedControl, ProcId, A) + Send + Sync + 'static,
    {
        self.inner.portable.register_call(
            name,
            Box::new(move |dc, source, _packet, args| {
                let args: A = bincode::deserialize(args)?;
                handler(dc, source, args);
                Ok(())
            }),
        );
    }

    /// Registers a portable request handler; the handler receives a reply
    /// id as its first argument and must answer with `send_reply`.
    pub fn register_portable_request<A, F>(&self, name: &str, handler: F)
    where
        A: DeserializeOwned,
        F: Fn(&DistributedControl, ProcId, u64, A) + Send + Sync + 'static,
    {
        self.inner.portable.register_request(
            name,
            Box::new(move |dc, source, _packet, args| {
                let (reply_id, args): (u64, A) = bincode::deserialize(args)?;
                handler(dc, source, reply_id, args);
                Ok(())
            }),
        );
    }

    /// Registers a distributed object, returning its stable id. All
    /// peers must construct distributed objects in identical order.
    pub fn register_object(&self, object: Weak<dyn DistObject>) -> u64 {
        let mut objects = self.inner.objects.write();
        objects.push(object);
        (objects.len() - 1) as u64
    }

    // -----------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------

    /// Issues a call dispatched through the target's handler pool.
    pub fn remote_call<A: Serialize>(
        &self,
        target: ProcId,
        id: DispatchId,
        args: &A,
    ) -> Result<(), RpcError> {
        self.send_call(target, id, args, PacketType::Call)
    }

    /// Issues a call executed inline on the target's receive thread.
    pub fn fast_call<A: Serialize>(
        &self,
        target: ProcId,
        id: DispatchId,
        args: &A,
    ) -> Result<(), RpcError> {
        self.send_call(target, id, args, PacketType::FastCall)
    }

    /// Issues a framework-internal call, excluded from call counters.
    pub fn control_call<A: Serialize>(
        &self,
        target: ProcId,
        id: DispatchId,
        args: &A,
    ) -> Result<(), RpcError> {
        self.send_call(target, id, args, PacketType::Control)
    }

    /// Issues a portable call by function name.
    pub fn portable_call<A: Serialize>(
        &self,
        target: ProcId,
        name: &str,
        args: &A,
    ) -> Result<(), RpcError> {
        self.send_portable(target, name, false, args)
    }

    /// Issues a portable request; `args` are paired with a reply id the
    /// handler answers through.
    pub fn portable_request<A: Serialize>(
        &self,
        target: ProcId,
        name: &str,
        args: &A,
    ) -> Result<Arc<ReplySlot>, RpcError> {
        let (reply_id, slot) = self.create_reply_slot();
        self.inner.calls_sent.fetch_add(1, Ordering::SeqCst);
        let blob = bincode::serialize(&(reply_id, args))?;
        let payload = crate::wire::encode_portable(name, true, &blob);
        self.sender(target)?.send_frame(PacketType::Call, &payload)?;
        Ok(slot)
    }

    fn send_call<A: Serialize>(
        &self,
        target: ProcId,
        id: DispatchId,
        args: &A,
        packet: PacketType,
    ) -> Result<(), RpcError> {
        if packet.counted() {
            self.inner.calls_sent.fetch_add(1, Ordering::SeqCst);
        }
        let blob = bincode::serialize(args)?;
        let payload = encode_call(id.wire_id(), &blob);
        self.sender(target)?.send_frame(packet, &payload)
    }

    fn send_portable<A: Serialize>(
        &self,
        target: ProcId,
        name: &str,
        is_request: bool,
        args: &A,
    ) -> Result<(), RpcError> {
        self.inner.calls_sent.fetch_add(1, Ordering::SeqCst);
        let blob = bincode::serialize(args)?;
        let payload = crate::wire::encode_portable(name, is_request, &blob);
        self.sender(target)?.send_frame(PacketType::Call, &payload)
    }

    /// Issues a call targeting a distributed object member.
    pub(crate) fn object_call<A: Serialize>(
        &self,
        target: ProcId,
        object_id: u64,
        member: u32,
        args: &A,
        packet: PacketType,
    ) -> Result<(), RpcError> {
        if packet.counted() {
            self.inner.calls_sent.fetch_add(1, Ordering::SeqCst);
        }
        let blob = bincode::serialize(args)?;
        let mut object_args = Vec::with_capacity(12 + blob.len());
        let _ = object_args.write_u64::<LittleEndian>(object_id);
        let _ = object_args.write_u32::<LittleEndian>(member);
        object_args.extend_from_slice(&blob);
        let payload = encode_call(self.inner.builtins.object.wire_id(), &object_args);
        self.sender(target)?.send_frame(packet, &payload)
    }

    fn sender(&self, target: ProcId) -> Result<&dyn Sender, RpcError> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(RpcError::Shutdown);
        }
        self.inner
            .senders
            .get(target.index())
            .map(|s| s.as_ref())
            .ok_or(RpcError::InvalidPeer(target))
    }

    // -----------------------------------------------------------------
    // Reply rendezvous
    // -----------------------------------------------------------------

    /// Allocates a reply slot a peer can answer through `send_reply`.
    pub fn create_reply_slot(&self) -> (u64, Arc<ReplySlot>) {
        let id = self.inner.next_reply_id.fetch_add(1, Ordering::SeqCst);
        let slot = ReplySlot::new();
        self.inner.reply_slots.insert(id, Arc::clone(&slot));
        (id, slot)
    }

    /// Answers a reply id previously received in a request.
    pub fn send_reply(&self, target: ProcId, reply_id: u64, blob: Vec<u8>) -> Result<(), RpcError> {
        self.control_call(target, self.inner.builtins.reply, &(reply_id, blob))
    }

    pub(crate) fn fulfill_reply(&self, reply_id: u64, blob: Vec<u8>) {
        match self.inner.reply_slots.remove(&reply_id) {
            Some((_, slot)) => slot.fill(blob),
            None => tracing::warn!(reply_id, "reply for unknown slot dropped"),
        }
    }

    // -----------------------------------------------------------------
    // Barriers
    // -----------------------------------------------------------------

    /// Sequencing point towards one peer: calls issued to `target` before
    /// this barrier complete before any call issued after it dispatches.
    pub fn comm_barrier_to(&self, target: ProcId) -> Result<(), RpcError> {
        if target == self.procid() {
            return Ok(());
        }
        let sender = self.sender(target)?;
        sender.send_frame(PacketType::Barrier, &[])?;
        sender.flush()
    }

    /// Broadcasts a comm barrier to every peer.
    pub fn comm_barrier(&self) -> Result<(), RpcError> {
        for p in 0..self.numprocs() {
            self.comm_barrier_to(ProcId(p as u32))?;
        }
        Ok(())
    }

    /// Flushes every buffered sender.
    pub fn flush_all(&self) -> Result<(), RpcError> {
        for sender in &self.inner.senders {
            sender.flush()?;
        }
        Ok(())
    }

    /// Global barrier: flushes senders, issues comm barriers, and repeats
    /// counting-barrier rounds until every user call sent anywhere in the
    /// cluster has been processed. All processes must call this together.
    pub fn full_barrier(&self) -> Result<(), RpcError> {
        self.flush_all()?;
        self.comm_barrier()?;
        let n = self.numprocs();
        let me = self.procid();
        loop {
            if !self.inner.fcall_queue.wait_until_empty() {
                return Err(RpcError::Shutdown);
            }
            let epoch = self.inner.barrier.next_epoch();
            let sent = self.inner.calls_sent.load(Ordering::SeqCst);
            let processed = self.inner.calls_processed.load(Ordering::SeqCst);
            let quiescent = if n == 1 {
                sent == processed
            } else if me.0 == 0 {
                self.inner.barrier.note_entered(epoch, sent, processed);
                let (sent_sum, processed_sum) = self.inner.barrier.wait_entered(epoch, n);
                let quiescent = sent_sum == processed_sum;
                for p in 1..n {
                    self.control_call(
                        ProcId(p as u32),
                        self.inner.builtins.barrier_release,
                        &(epoch, quiescent),
                    )?;
                }
                quiescent
            } else {
                self.control_call(
                    ProcId(0),
                    self.inner.builtins.barrier_enter,
                    &(epoch, sent, processed),
                )?;
                self.inner.barrier.wait_released(epoch)
            };
            if quiescent {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    // -----------------------------------------------------------------
    // Receive path
    // -----------------------------------------------------------------

    pub(crate) fn enqueue_call(&self, source: ProcId, payload: Vec<u8>) {
        self.inner.fcall_queue.enqueue(FunctionCall { source, payload });
    }

    /// Decodes and dispatches one call payload.
    pub(crate) fn execute_call(
        &self,
        source: ProcId,
        packet: PacketType,
        payload: &[u8],
    ) -> Result<(), RpcError> {
        let (dispatch_id, rest) = split_call(payload, source)?;
        if packet.counted() {
            self.inner.calls_received.fetch_add(1, Ordering::SeqCst);
        }
        let result = if dispatch_id == PORTABLE_DISPATCH_ID {
            match split_portable(rest, source) {
                Ok((name, is_request, args)) => self
                    .inner
                    .portable
                    .invoke(self, name, is_request, source, packet, args),
                Err(err) => Err(err),
            }
        } else {
            self.inner.dispatch.invoke(self, dispatch_id, source, packet, rest)
        };
        if packet.counted() {
            self.inner.calls_processed.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    pub(crate) fn dispatch_object(
        &self,
        object_id: u64,
        member: u32,
        source: ProcId,
        packet: PacketType,
        args: &[u8],
    ) -> Result<(), RpcError> {
        let object = self
            .inner
            .objects
            .read()
            .get(object_id as usize)
            .and_then(Weak::upgrade)
            .ok_or(RpcError::UnknownObject(object_id))?;
        if packet.counted() {
            object.port().inc_calls_received();
        }
        if member == MEMBER_SEND_TO {
            object.port().handle_send_to(source, args)
        } else {
            object.dispatch_member(self, source, packet, member, args)
        }
    }

    pub(crate) fn transport_failure(&self, source: ProcId, err: RpcError) {
        tracing::error!(source = source.0, %err, "transport failure; control plane unhealthy");
        self.inner.healthy.store(false, Ordering::SeqCst);
    }

    fn handler_loop(&self) {
        while let Some(call) = self.inner.fcall_queue.dequeue() {
            if let Err(err) = self.execute_call(call.source, PacketType::Call, &call.payload) {
                tracing::error!(source = call.source.0, %err, "deferred dispatch failed");
            }
            self.inner.receivers[call.source.index()].function_call_completed(self);
        }
    }

    // -----------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------

    /// Stops the handler pool, closes the transport and joins all
    /// threads. Idempotent; call on every process after the last barrier.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(rank = self.procid().0, "shutting down distributed control");
        self.inner.fcall_queue.stop_blocking();
        let handles: Vec<_> = self.inner.handler_threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        self.inner.comm.close();
    }
}

// ---------------------------------------------------------------------
// Builtin thunks
// ---------------------------------------------------------------------

fn reply_thunk(
    dc: &DistributedControl,
    _source: ProcId,
    _packet: PacketType,
    args: &[u8],
) -> Result<(), RpcError> {
    let (reply_id, blob): (u64, Vec<u8>) = bincode::deserialize(args)?;
    dc.fulfill_reply(reply_id, blob);
    Ok(())
}

fn object_thunk(
    dc: &DistributedControl,
    source: ProcId,
    packet: PacketType,
    args: &[u8],
) -> Result<(), RpcError> {
    let mut reader = args;
    let object_id = reader
        .read_u64::<LittleEndian>()
        .map_err(|_| RpcError::MalformedFrame { source_proc: source })?;
    let member = reader
        .read_u32::<LittleEndian>()
        .map_err(|_| RpcError::MalformedFrame { source_proc: source })?;
    dc.dispatch_object(object_id, member, source, packet, reader)
}

fn barrier_enter_thunk(
    dc: &DistributedControl,
    _source: ProcId,
    _packet: PacketType,
    args: &[u8],
) -> Result<(), RpcError> {
    let (epoch, sent, processed): (u64, u64, u64) = bincode::deserialize(args)?;
    dc.inner.barrier.note_entered(epoch, sent, processed);
    Ok(())
}

fn barrier_release_thunk(
    dc: &DistributedControl,
    _source: ProcId,
    _packet: PacketType,
    args: &[u8],
) -> Result<(), RpcError> {
    let (epoch, quiescent): (u64, bool) = bincode::deserialize(args)?;
    dc.inner.barrier.note_released(epoch, quiescent);
    Ok(())
}
