//! Communication transports: raw byte delivery between processes.
//!
//! A [`Comm`] moves opaque byte runs between ranks and feeds received
//! bytes to a callback on a per-peer receive thread. Two implementations:
//! [`TcpComm`] connects a full mesh of TCP streams, and [`LocalMesh`]
//! wires up an in-process cluster over queues, used by tests and
//! single-process runs.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::{Mutex, RwLock};

use graphmill_core::id::ProcId;
use graphmill_core::queue::BlockingQueue;

use crate::error::RpcError;

/// Invoked on a receive thread whenever bytes arrive from a peer.
pub type RecvCallback = Arc<dyn Fn(ProcId, &[u8]) + Send + Sync>;

/// A byte transport between the processes of a cluster.
pub trait Comm: Send + Sync {
    /// This process's rank.
    fn procid(&self) -> ProcId;

    /// Number of processes in the cluster.
    fn numprocs(&self) -> usize;

    /// Installs the receive callback and starts the receive threads.
    fn start(&self, callback: RecvCallback) -> Result<(), RpcError>;

    /// Delivers bytes to `target`, preserving per-destination order.
    fn send(&self, target: ProcId, data: &[u8]) -> Result<(), RpcError>;

    /// Tears down connections and joins receive threads.
    fn close(&self);
}

// ---------------------------------------------------------------------
// In-process mesh
// ---------------------------------------------------------------------

/// Builder for an in-process cluster of [`LocalComm`] endpoints.
pub struct LocalMesh;

impl LocalMesh {
    /// Creates `n` connected endpoints, one per simulated process.
    pub fn create(n: usize) -> Vec<LocalComm> {
        let inboxes: Arc<Vec<BlockingQueue<(ProcId, Vec<u8>)>>> =
            Arc::new((0..n).map(|_| BlockingQueue::new()).collect());
        (0..n)
            .map(|rank| LocalComm {
                rank: ProcId(rank as u32),
                numprocs: n,
                inboxes: Arc::clone(&inboxes),
                pump: Mutex::new(None),
                closed: AtomicBool::new(false),
            })
            .collect()
    }
}

/// One endpoint of an in-process mesh.
pub struct LocalComm {
    rank: ProcId,
    numprocs: usize,
    inboxes: Arc<Vec<BlockingQueue<(ProcId, Vec<u8>)>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Comm for LocalComm {
    fn procid(&self) -> ProcId {
        self.rank
    }

    fn numprocs(&self) -> usize {
        self.numprocs
    }

    fn start(&self, callback: RecvCallback) -> Result<(), RpcError> {
        let inboxes = Arc::clone(&self.inboxes);
        let me = self.rank.index();
        let handle = thread::spawn(move || {
            while let Some((source, bytes)) = inboxes[me].dequeue() {
                callback(source, &bytes);
            }
        });
        *self.pump.lock() = Some(handle);
        Ok(())
    }

    fn send(&self, target: ProcId, data: &[u8]) -> Result<(), RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::Shutdown);
        }
        let inbox = self
            .inboxes
            .get(target.index())
            .ok_or(RpcError::InvalidPeer(target))?;
        inbox.enqueue((self.rank, data.to_vec()));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inboxes[self.rank.index()].stop_blocking();
        if let Some(handle) = self.pump.lock().take() {
            let _ = handle.join();
        }
    }
}

// ---------------------------------------------------------------------
// TCP mesh
// ---------------------------------------------------------------------

/// How long connect attempts retry while the mesh is forming.
const CONNECT_RETRY_WINDOW: Duration = Duration::from_secs(10);
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Full-mesh TCP transport: one stream per peer, one receive thread per
/// stream.
///
/// Mesh formation is rank-ordered: every process listens on its own
/// address, dials every lower rank (announcing its own rank on the new
/// stream), and accepts one connection from every higher rank.
pub struct TcpComm {
    rank: ProcId,
    streams: Vec<Option<Mutex<TcpStream>>>,
    callback: RwLock<Option<RecvCallback>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TcpComm {
    /// Forms the mesh for `rank` out of the cluster's listen addresses.
    pub fn connect(addrs: &[SocketAddr], rank: usize) -> Result<Self, RpcError> {
        if rank >= addrs.len() {
            return Err(RpcError::InvalidPeer(ProcId(rank as u32)));
        }
        let listener = TcpListener::bind(addrs[rank])?;
        let mut streams: Vec<Option<Mutex<TcpStream>>> =
            (0..addrs.len()).map(|_| None).collect();

        // Dial every lower rank, retrying while it comes up.
        for (peer, addr) in addrs.iter().enumerate().take(rank) {
            let mut stream = Self::dial(*addr)?;
            stream.write_u32::<LittleEndian>(rank as u32)?;
            stream.flush()?;
            streams[peer] = Some(Mutex::new(stream));
        }

        // Accept one connection from every higher rank.
        for _ in rank + 1..addrs.len() {
            let (mut stream, _) = listener.accept()?;
            let peer = stream.read_u32::<LittleEndian>()? as usize;
            if peer <= rank || peer >= addrs.len() || streams[peer].is_some() {
                return Err(RpcError::InvalidPeer(ProcId(peer as u32)));
            }
            streams[peer] = Some(Mutex::new(stream));
        }

        Ok(TcpComm {
            rank: ProcId(rank as u32),
            streams,
            callback: RwLock::new(None),
            readers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn dial(addr: SocketAddr) -> Result<TcpStream, RpcError> {
        let deadline = Instant::now() + CONNECT_RETRY_WINDOW;
        loop {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(err) => {
                    if Instant::now() >= deadline {
                        return Err(err.into());
                    }
                    thread::sleep(CONNECT_RETRY_DELAY);
                }
            }
        }
    }
}

impl Comm for TcpComm {
    fn procid(&self) -> ProcId {
        self.rank
    }

    fn numprocs(&self) -> usize {
        self.streams.len()
    }

    fn start(&self, callback: RecvCallback) -> Result<(), RpcError> {
        *self.callback.write() = Some(Arc::clone(&callback));
        let mut readers = self.readers.lock();
        for (peer, slot) in self.streams.iter().enumerate() {
            let Some(stream) = slot else { continue };
            let stream = stream.lock().try_clone()?;
            let callback = Arc::clone(&callback);
            let source = ProcId(peer as u32);
            readers.push(thread::spawn(move || {
                let mut stream = stream;
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => callback(source, &buf[..n]),
                    }
                }
            }));
        }
        Ok(())
    }

    fn send(&self, target: ProcId, data: &[u8]) -> Result<(), RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::Shutdown);
        }
        if target == self.rank {
            // Local delivery short-circuits the socket layer.
            if let Some(callback) = self.callback.read().as_ref() {
                callback(self.rank, data);
            }
            return Ok(());
        }
        let slot = self
            .streams
            .get(target.index())
            .ok_or(RpcError::InvalidPeer(target))?;
        let stream = slot.as_ref().ok_or(RpcError::InvalidPeer(target))?;
        let mut stream = stream.lock();
        stream.write_all(data)?;
        stream.flush()?;
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for slot in self.streams.iter().flatten() {
            let _ = slot.lock().shutdown(Shutdown::Both);
        }
        let readers: Vec<_> = self.readers.lock().drain(..).collect();
        for handle in readers {
            let _ = handle.join();
        }
        *self.callback.write() = None;
    }
}
