//! Per-source receivers: byte stream in, dispatched calls out.
//!
//! One receiver per source process. The comm layer feeds raw byte runs to
//! `incoming_data`, which appends them to an internal buffer and parses
//! complete frames. `Call` frames are enqueued on the process-wide
//! function-call queue for the handler pool; `FastCall` and `Control`
//! frames dispatch inline on the receive thread; a `Barrier` frame gates
//! further parsing from this source until every deferred call it has in
//! flight completes, making `comm_barrier` a per-source sequencing point.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use graphmill_core::id::ProcId;

use crate::control::DistributedControl;
use crate::error::RpcError;
use crate::wire::{decode_frame, PacketType};

struct RecvBuffer {
    buf: Vec<u8>,
    /// Bytes of `buf` already parsed.
    pos: usize,
    /// Set while a barrier holds back parsing.
    barrier: bool,
}

/// Parses and routes the byte stream from one source process.
pub struct Receiver {
    source: ProcId,
    state: Mutex<RecvBuffer>,
    /// Calls from this source sitting in the deferred-dispatch queue.
    pending_calls: AtomicUsize,
    bytes_received: AtomicU64,
}

impl Receiver {
    pub fn new(source: ProcId) -> Self {
        Receiver {
            source,
            state: Mutex::new(RecvBuffer {
                buf: Vec::new(),
                pos: 0,
                barrier: false,
            }),
            pending_calls: AtomicUsize::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    /// Total raw bytes accepted from this source.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Accepts raw bytes from the comm callback.
    pub fn incoming_data(&self, dc: &DistributedControl, data: &[u8]) {
        self.bytes_received.fetch_add(data.len() as u64, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.buf.extend_from_slice(data);
        self.process(&mut state, dc);
    }

    /// Called after the handler pool finishes one of this source's
    /// deferred calls; a pending barrier lifts once the count drains.
    pub fn function_call_completed(&self, dc: &DistributedControl) {
        if self.pending_calls.fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut state = self.state.lock();
            if state.barrier && self.pending_calls.load(Ordering::SeqCst) == 0 {
                state.barrier = false;
                self.process(&mut state, dc);
            }
        }
    }

    /// Parses complete frames until the buffer runs dry or a barrier
    /// gates the stream. Caller holds the state lock.
    fn process(&self, state: &mut RecvBuffer, dc: &DistributedControl) {
        while !state.barrier {
            let frame = match decode_frame(&state.buf[state.pos..], self.source) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(source = self.source.0, %err, "dropping corrupt stream");
                    dc.transport_failure(self.source, err);
                    state.buf.clear();
                    state.pos = 0;
                    break;
                }
            };
            let (packet, payload, consumed) = frame;
            match packet {
                PacketType::Call => {
                    self.pending_calls.fetch_add(1, Ordering::SeqCst);
                    dc.enqueue_call(self.source, payload.to_vec());
                }
                PacketType::FastCall | PacketType::Control => {
                    if let Err(err) = dc.execute_call(self.source, packet, payload) {
                        tracing::error!(source = self.source.0, %err, "inline dispatch failed");
                    }
                }
                PacketType::Barrier => {
                    if self.pending_calls.load(Ordering::SeqCst) > 0 {
                        state.barrier = true;
                    }
                }
            }
            state.pos += consumed;
            // Reclaim consumed space once it dominates the buffer.
            if state.pos > 4096 && state.pos * 2 > state.buf.len() {
                state.buf.drain(..state.pos);
                state.pos = 0;
            }
        }
    }
}
