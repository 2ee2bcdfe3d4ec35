#![cfg(all(test, not(target_arch = "wasm32")))]

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use device_abi::BufferRole;
use device_soft::{RetireMode, SoftDevice};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use stream_buffer::{StrategyKind, StreamBuffer, StreamConfig};

const CAPACITY: usize = 4096;
const IDLE: Duration = Duration::from_millis(1);

/// A draw call that reads `bytes.len()` bytes at `offset` once the GPU gets to it.
struct Draw {
    seq: u64,
    buffer: u32,
    offset: usize,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct ConsumerStats {
    draws: usize,
    bytes: usize,
}

fn payload(index: usize, rng: &mut StdRng) -> Vec<u8> {
    let len = rng.gen_range(1..=200);
    (0..len).map(|i| (index * 7 + i) as u8).collect()
}

/// Producer: streams `count` payloads and submits one draw per payload.
///
/// The stream is torn down while the draw channel is still open, so the
/// consumer keeps retiring work until teardown has finished waiting.
fn run_producer(
    device: SoftDevice,
    mut stream: StreamBuffer<SoftDevice>,
    count: usize,
    draws: Sender<Draw>,
) -> thread::JoinHandle<usize> {
    thread::spawn(move || {
        let buffer = stream.buffer().id();
        let mut rng = StdRng::seed_from_u64(stream.kind() as u64);
        let mut wraps = 0;
        let mut last_offset = 0;

        for index in 0..count {
            let bytes = payload(index, &mut rng);
            let offset = stream.push(&bytes, 4).expect("push");
            if offset < last_offset {
                wraps += 1;
            }
            last_offset = offset;
            device.timeline().submit_with(|seq| {
                draws
                    .send(Draw {
                        seq,
                        buffer,
                        offset,
                        bytes,
                    })
                    .expect("consumer alive")
            });
        }
        stream.destroy().expect("drain on teardown");
        drop(draws);
        wraps
    })
}

/// Consumer: executes draws in order and retires them on the timeline.
///
/// When no draw arrives for a while, everything submitted before the wait
/// began has been executed, so the GPU retires up to that point. This lets
/// fences inserted after the last draw complete.
fn run_consumer(
    device: SoftDevice,
    draws: Receiver<Draw>,
    stats: Arc<Mutex<ConsumerStats>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        let horizon = device.timeline().submitted();
        match draws.recv_timeout(IDLE) {
            Ok(draw) => {
                let seen = device
                    .read_buffer(draw.buffer, draw.offset, draw.bytes.len())
                    .expect("draw range in bounds");
                assert_eq!(
                    seen, draw.bytes,
                    "draw {} read overwritten data at offset {}",
                    draw.seq, draw.offset
                );
                device.timeline().retire_through(draw.seq);
                let mut stats = stats.lock();
                stats.draws += 1;
                stats.bytes += draw.bytes.len();
            }
            Err(RecvTimeoutError::Timeout) => device.timeline().retire_through(horizon),
            Err(RecvTimeoutError::Disconnected) => {
                device.timeline().retire_all();
                break;
            }
        }
    })
}

fn stream_through_gpu(kind: StrategyKind, count: usize) {
    let device = SoftDevice::with_mode(RetireMode::Manual);
    let stream = StreamBuffer::with_strategy(
        device.clone(),
        BufferRole::Vertex,
        CAPACITY,
        kind,
        &StreamConfig::unbounded(),
    )
    .expect("create stream buffer");
    let (tx, rx) = unbounded();
    let stats = Arc::new(Mutex::new(ConsumerStats::default()));

    let consumer = run_consumer(device.clone(), rx, Arc::clone(&stats));
    let producer = run_producer(device.clone(), stream, count, tx);

    let wraps = producer.join().expect("producer");
    consumer.join().expect("consumer");

    let stats = stats.lock();
    assert_eq!(stats.draws, count, "{kind}");
    assert!(stats.bytes > CAPACITY * 2, "{kind} should lap the ring");
    assert!(wraps >= 2, "{kind} wrapped {wraps} times");
    assert_eq!(device.timeline().completed(), device.timeline().submitted(), "{kind}");
    assert_eq!(device.live_fences(), 0, "{kind}");
    assert_eq!(device.live_buffers(), 0, "{kind}");
}

#[test]
fn fence_synced_never_overwrites_pending_draws() {
    stream_through_gpu(StrategyKind::FenceSynced, 500);
}

#[test]
fn persistent_never_overwrites_pending_draws() {
    stream_through_gpu(StrategyKind::Persistent, 500);
}

#[test]
fn pinned_never_overwrites_pending_draws() {
    stream_through_gpu(StrategyKind::Pinned, 500);
}

#[test]
#[ignore]
fn slow_persistent_long_run() {
    stream_through_gpu(StrategyKind::Persistent, 50_000);
}
