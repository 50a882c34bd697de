//! Per-destination senders.
//!
//! One sender per destination, each guaranteeing per-destination FIFO
//! delivery. [`StreamSender`] pushes every frame straight to the
//! transport; [`BufferedStreamSender`] coalesces frames until a size
//! threshold or an explicit flush.

use std::sync::Arc;

use parking_lot::Mutex;

use graphmill_core::id::ProcId;

use crate::comm::Comm;
use crate::error::RpcError;
use crate::wire::{encode_frame, PacketType};

/// A frame sink bound to one destination.
pub trait Sender: Send + Sync {
    /// Frames and delivers one message.
    fn send_frame(&self, packet: PacketType, payload: &[u8]) -> Result<(), RpcError>;

    /// Pushes any coalesced bytes to the transport.
    fn flush(&self) -> Result<(), RpcError>;
}

/// Sender that flushes each frame to the transport immediately.
pub struct StreamSender {
    comm: Arc<dyn Comm>,
    target: ProcId,
    scratch: Mutex<Vec<u8>>,
}

impl StreamSender {
    pub fn new(comm: Arc<dyn Comm>, target: ProcId) -> Self {
        StreamSender {
            comm,
            target,
            scratch: Mutex::new(Vec::new()),
        }
    }
}

impl Sender for StreamSender {
    fn send_frame(&self, packet: PacketType, payload: &[u8]) -> Result<(), RpcError> {
        // Holding the scratch lock across the transport send keeps frames
        // from interleaving on the destination stream.
        let mut scratch = self.scratch.lock();
        scratch.clear();
        encode_frame(&mut scratch, packet, payload);
        self.comm.send(self.target, &scratch)
    }

    fn flush(&self) -> Result<(), RpcError> {
        Ok(())
    }
}

/// Default coalescing threshold for the buffered sender.
pub const DEFAULT_BUFFER_THRESHOLD: usize = 64 * 1024;

/// Sender that coalesces frames until `threshold` bytes accumulate or an
/// explicit flush.
pub struct BufferedStreamSender {
    comm: Arc<dyn Comm>,
    target: ProcId,
    buffer: Mutex<Vec<u8>>,
    threshold: usize,
}

impl BufferedStreamSender {
    pub fn new(comm: Arc<dyn Comm>, target: ProcId, threshold: usize) -> Self {
        BufferedStreamSender {
            comm,
            target,
            buffer: Mutex::new(Vec::new()),
            threshold: threshold.max(1),
        }
    }
}

impl Sender for BufferedStreamSender {
    fn send_frame(&self, packet: PacketType, payload: &[u8]) -> Result<(), RpcError> {
        let mut buffer = self.buffer.lock();
        encode_frame(&mut buffer, packet, payload);
        if buffer.len() >= self.threshold {
            let out = std::mem::take(&mut *buffer);
            self.comm.send(self.target, &out)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), RpcError> {
        let mut buffer = self.buffer.lock();
        if buffer.is_empty() {
            return Ok(());
        }
        let out = std::mem::take(&mut *buffer);
        self.comm.send(self.target, &out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{Comm, LocalMesh};
    use parking_lot::Mutex as PlMutex;
    use std::thread;
    use std::time::{Duration, Instant};

    fn collect_from(comm: &dyn Comm) -> Arc<PlMutex<Vec<u8>>> {
        let received = Arc::new(PlMutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        comm.start(Arc::new(move |_, bytes: &[u8]| {
            sink.lock().extend_from_slice(bytes);
        }))
        .unwrap();
        received
    }

    fn wait_len(buf: &PlMutex<Vec<u8>>, len: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while buf.lock().len() < len && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn stream_sender_delivers_each_frame() {
        let mut comms = LocalMesh::create(2);
        let receiver = comms.pop().unwrap();
        let received = collect_from(&receiver);

        let sender = StreamSender::new(Arc::new(comms.pop().unwrap()), ProcId(1));
        sender.send_frame(PacketType::Call, b"one").unwrap();
        sender.send_frame(PacketType::Call, b"two").unwrap();

        wait_len(&received, 2 * (crate::wire::FRAME_HEADER_LEN + 3));
        let bytes = received.lock();
        assert_eq!(bytes.len(), 2 * (crate::wire::FRAME_HEADER_LEN + 3));
        receiver.close();
    }

    #[test]
    fn buffered_sender_holds_until_flush() {
        let mut comms = LocalMesh::create(2);
        let receiver = comms.pop().unwrap();
        let received = collect_from(&receiver);

        let sender =
            BufferedStreamSender::new(Arc::new(comms.pop().unwrap()), ProcId(1), 1024);
        sender.send_frame(PacketType::Call, b"held").unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(received.lock().is_empty());

        sender.flush().unwrap();
        wait_len(&received, crate::wire::FRAME_HEADER_LEN + 4);
        assert_eq!(received.lock().len(), crate::wire::FRAME_HEADER_LEN + 4);
        receiver.close();
    }

    #[test]
    fn buffered_sender_flushes_at_threshold() {
        let mut comms = LocalMesh::create(2);
        let receiver = comms.pop().unwrap();
        let received = collect_from(&receiver);

        let sender = BufferedStreamSender::new(Arc::new(comms.pop().unwrap()), ProcId(1), 8);
        sender.send_frame(PacketType::Call, b"0123456789").unwrap();
        wait_len(&received, crate::wire::FRAME_HEADER_LEN + 10);
        assert_eq!(received.lock().len(), crate::wire::FRAME_HEADER_LEN + 10);
        receiver.close();
    }
}
