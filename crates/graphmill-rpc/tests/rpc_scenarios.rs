//! Cluster scenarios over an in-process mesh: call ordering, portable
//! dispatch, matched send/receive, barriers and the delta DHT.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use graphmill_core::id::ProcId;
use graphmill_rpc::{
    Comm, ControlOptions, DeltaDht, DistObject, DistributedControl, LocalMesh, ObjectPort,
    PacketType, RpcError,
};

fn local_cluster(n: usize) -> Vec<DistributedControl> {
    local_cluster_with(n, ControlOptions::default())
}

fn local_cluster_with(n: usize, options: ControlOptions) -> Vec<DistributedControl> {
    LocalMesh::create(n)
        .into_iter()
        .map(|comm| {
            DistributedControl::new(Arc::new(comm) as Arc<dyn Comm>, options.clone()).unwrap()
        })
        .collect()
}

fn wait_for(predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn calls_arrive_in_submission_order_per_sender() {
    let cluster = local_cluster(2);
    let received: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

    // Both peers register in the same order; only peer 1's sink is used.
    let ids: Vec<_> = cluster
        .iter()
        .map(|dc| {
            let sink = Arc::clone(&received);
            dc.register_handler(move |_dc: &DistributedControl, _src, seq: u64| {
                sink.lock().push(seq);
            })
        })
        .collect();
    assert_eq!(ids[0], ids[1]);

    const N: u64 = 200;
    for seq in 0..N {
        cluster[0].remote_call(ProcId(1), ids[0], &seq).unwrap();
    }

    wait_for(|| received.lock().len() == N as usize);
    let got = received.lock();
    assert_eq!(*got, (0..N).collect::<Vec<_>>());

    assert_eq!(cluster[0].calls_sent(), N);
    wait_for(|| cluster[1].calls_received() == N);

    for dc in &cluster {
        dc.shutdown();
    }
}

#[test]
fn buffered_senders_preserve_order_after_flush() {
    let options = ControlOptions {
        buffered_send: true,
        buffer_threshold: 512,
        ..ControlOptions::default()
    };
    let cluster = local_cluster_with(2, options);
    let received: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

    let ids: Vec<_> = cluster
        .iter()
        .map(|dc| {
            let sink = Arc::clone(&received);
            dc.register_handler(move |_dc: &DistributedControl, _src, seq: u64| {
                sink.lock().push(seq);
            })
        })
        .collect();

    for seq in 0..50u64 {
        cluster[0].remote_call(ProcId(1), ids[0], &seq).unwrap();
    }
    cluster[0].flush_all().unwrap();

    wait_for(|| received.lock().len() == 50);
    assert_eq!(*received.lock(), (0..50).collect::<Vec<_>>());

    for dc in &cluster {
        dc.shutdown();
    }
}

#[test]
fn fast_calls_dispatch_without_the_handler_pool() {
    let cluster = local_cluster(2);
    let hits = Arc::new(AtomicU64::new(0));

    let ids: Vec<_> = cluster
        .iter()
        .map(|dc| {
            let hits = Arc::clone(&hits);
            dc.register_handler(move |_dc: &DistributedControl, _src, n: u64| {
                hits.fetch_add(n, Ordering::SeqCst);
            })
        })
        .collect();

    cluster[0].fast_call(ProcId(1), ids[0], &5u64).unwrap();
    wait_for(|| hits.load(Ordering::SeqCst) == 5);

    for dc in &cluster {
        dc.shutdown();
    }
}

#[test]
fn portable_calls_dispatch_by_name() {
    let cluster = local_cluster(2);
    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    for dc in &cluster {
        let sink = Arc::clone(&received);
        dc.register_portable("note", move |_dc: &DistributedControl, _src, text: String| {
            sink.lock().push(text);
        });
    }

    cluster[0]
        .portable_call(ProcId(1), "note", &"hello".to_string())
        .unwrap();
    wait_for(|| received.lock().len() == 1);
    assert_eq!(received.lock()[0], "hello");

    for dc in &cluster {
        dc.shutdown();
    }
}

#[test]
fn portable_requests_round_trip_a_reply() {
    let cluster = local_cluster(2);

    for dc in &cluster {
        dc.register_portable_request(
            "double",
            move |dc: &DistributedControl, src, reply_id, n: u64| {
                let doubled = bincode::serialize(&(n * 2)).unwrap();
                dc.send_reply(src, reply_id, doubled).unwrap();
            },
        );
    }

    let slot = cluster[0]
        .portable_request(ProcId(1), "double", &21u64)
        .unwrap();
    let answer: u64 = bincode::deserialize(&slot.wait()).unwrap();
    assert_eq!(answer, 42);

    for dc in &cluster {
        dc.shutdown();
    }
}

/// Minimal distributed object exercising the port surface directly.
struct Mailbox {
    port: ObjectPort,
}

impl Mailbox {
    fn new(dc: &DistributedControl) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let object_id = dc.register_object(weak.clone() as Weak<dyn DistObject>);
            Mailbox {
                port: ObjectPort::new(dc.clone(), object_id),
            }
        })
    }
}

impl DistObject for Mailbox {
    fn port(&self) -> &ObjectPort {
        &self.port
    }

    fn dispatch_member(
        &self,
        _dc: &DistributedControl,
        _source: ProcId,
        _packet: PacketType,
        member: u32,
        _args: &[u8],
    ) -> Result<(), RpcError> {
        Err(RpcError::UnknownMember {
            object: self.port.object_id(),
            member,
        })
    }
}

#[test]
fn matched_send_recv_blocks_until_consumed() {
    let cluster = local_cluster(2);
    let mailboxes: Vec<_> = cluster.iter().map(Mailbox::new).collect();
    assert_eq!(
        mailboxes[0].port.object_id(),
        mailboxes[1].port.object_id()
    );

    let sender_done = Arc::new(AtomicU64::new(0));
    let sender = {
        let mailbox = Arc::clone(&mailboxes[0]);
        let done = Arc::clone(&sender_done);
        thread::spawn(move || {
            mailbox.port.send_to(ProcId(1), &vec![1u32, 2, 3]).unwrap();
            done.store(1, Ordering::SeqCst);
        })
    };

    // The sender must stay parked until the receiver consumes.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(sender_done.load(Ordering::SeqCst), 0);

    let value: Vec<u32> = mailboxes[1].port.recv_from(ProcId(0)).unwrap();
    assert_eq!(value, vec![1, 2, 3]);

    sender.join().unwrap();
    assert_eq!(sender_done.load(Ordering::SeqCst), 1);
    assert_eq!(mailboxes[0].port.calls_sent(), 1);
    assert_eq!(mailboxes[1].port.calls_received(), 1);

    for dc in &cluster {
        dc.shutdown();
    }
}

#[test]
fn delta_dht_converges_after_full_barrier() {
    let cluster = local_cluster(2);
    let dhts: Vec<Arc<DeltaDht<u32, u32>>> = cluster
        .iter()
        .map(|dc| DeltaDht::with_flush_threshold(dc, |acc, d| *acc += d, 16))
        .collect();

    const WRITES: u32 = 1000;
    let workers: Vec<_> = dhts
        .iter()
        .map(|dht| {
            let dht = Arc::clone(dht);
            thread::spawn(move || {
                for _ in 0..WRITES {
                    dht.accumulate(7, 1).unwrap();
                }
                dht.full_barrier().unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let owner = dhts[0].owner(&7);
    let on_owner = &dhts[owner.index()];
    assert!(on_owner.is_local(&7));
    assert_eq!(on_owner.get(&7).unwrap(), 2 * WRITES);

    // The non-owner reads the same value over RPC.
    let remote = &dhts[1 - owner.index()];
    assert_eq!(remote.get(&7).unwrap(), 2 * WRITES);

    for dc in &cluster {
        dc.shutdown();
    }
}

#[test]
fn full_barrier_drains_in_flight_calls() {
    let cluster = local_cluster(3);
    let counters: Vec<Arc<AtomicU64>> =
        (0..3).map(|_| Arc::new(AtomicU64::new(0))).collect();

    let mut ids = Vec::new();
    for (dc, counter) in cluster.iter().zip(&counters) {
        let counter = Arc::clone(counter);
        ids.push(dc.register_handler(
            move |_dc: &DistributedControl, _src, n: u64| {
                counter.fetch_add(n, Ordering::SeqCst);
            },
        ));
    }

    // Every process spams every other, then all enter the barrier.
    let workers: Vec<_> = cluster
        .iter()
        .enumerate()
        .map(|(me, dc)| {
            let dc = dc.clone();
            let id = ids[me];
            thread::spawn(move || {
                for peer in 0..3u32 {
                    if peer as usize == me {
                        continue;
                    }
                    for _ in 0..100 {
                        dc.remote_call(ProcId(peer), id, &1u64).unwrap();
                    }
                }
                dc.full_barrier().unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    // After the barrier, every delivery has been processed.
    for counter in &counters {
        assert_eq!(counter.load(Ordering::SeqCst), 200);
    }

    for dc in &cluster {
        dc.shutdown();
    }
}
