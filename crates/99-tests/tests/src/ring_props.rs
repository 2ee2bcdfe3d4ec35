#![cfg(all(test, not(target_arch = "wasm32")))]

use device_abi::BufferRole;
use device_soft::{RetireMode, SoftDevice};
use proptest::collection;
use proptest::prelude::*;
use stream_buffer::{StrategyKind, StreamBuffer, StreamConfig, StreamError, SYNC_SLOTS};

#[derive(Clone, Debug)]
struct Request {
    size: usize,
    stride: usize,
    used_pct: usize,
}

fn request() -> impl Strategy<Value = Request> {
    (1usize..=64, 0usize..=16, 0usize..=100).prop_map(|(size, stride, used_pct)| Request {
        size,
        stride,
        used_pct,
    })
}

fn used(req: &Request) -> usize {
    req.size * req.used_pct / 100
}

fn fenced_kind() -> impl Strategy<Value = StrategyKind> {
    prop_oneof![
        Just(StrategyKind::FenceSynced),
        Just(StrategyKind::Persistent),
        Just(StrategyKind::Pinned),
    ]
}

fn ranges_overlap(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 < b.0 + b.1 && b.0 < a.0 + a.1
}

proptest! {
    /// Without a wrap, offsets only move forward, honour the stride and never
    /// reach back into committed bytes.
    #[test]
    fn offsets_are_monotonic_aligned_and_disjoint(
        kind in fenced_kind(),
        reqs in collection::vec(request(), 1..64),
    ) {
        let capacity = 8192;
        let device = SoftDevice::new();
        let mut stream = StreamBuffer::with_strategy(
            device,
            BufferRole::Vertex,
            capacity,
            kind,
            &StreamConfig::default(),
        )
        .unwrap();

        let mut committed_end = 0;
        for req in &reqs {
            let region = stream.map(req.size, req.stride).unwrap();
            let offset = region.offset();
            prop_assert!(offset >= committed_end);
            prop_assert!(offset + req.size <= capacity);
            if req.stride != 0 {
                prop_assert_eq!(offset % req.stride, 0);
            }
            region.commit(used(req)).unwrap();
            committed_end = offset + used(req);
            prop_assert_eq!(stream.cursor().unwrap().write(), committed_end);
        }
    }

    /// A region is never handed out over bytes an unretired draw still reads,
    /// no matter how far the GPU lags behind.
    #[test]
    fn regions_never_alias_pending_draws(
        kind in fenced_kind(),
        reqs in collection::vec((request(), 0u8..4), 1..200),
    ) {
        let capacity = 1024;
        let device = SoftDevice::with_mode(RetireMode::Manual);
        let config = StreamConfig {
            fence_timeout_ms: Some(1),
            ..StreamConfig::default()
        };
        let mut stream = StreamBuffer::with_strategy(
            device.clone(),
            BufferRole::Vertex,
            capacity,
            kind,
            &config,
        )
        .unwrap();
        let timeline = device.timeline().clone();
        // (seq, offset, len) of draws the GPU has not finished yet.
        let mut pending: Vec<(u64, usize, usize)> = Vec::new();

        for (req, lag) in &reqs {
            let region = loop {
                match stream.map(req.size, req.stride) {
                    Ok(region) => break region,
                    Err(StreamError::FenceTimeout { slot, .. }) => {
                        prop_assert!(slot < SYNC_SLOTS);
                        // The GPU catches up and the producer retries the same request.
                        timeline.retire_all();
                        pending.clear();
                    }
                    Err(err) => return Err(TestCaseError::fail(err.to_string())),
                }
            };
            let offset = region.offset();
            for &(seq, start, len) in &pending {
                prop_assert!(
                    !ranges_overlap((offset, req.size), (start, len)),
                    "region {}+{} aliases pending draw {} at {}+{}",
                    offset, req.size, seq, start, len
                );
            }
            region.commit(used(req)).unwrap();
            let seq = timeline.submit();
            pending.push((seq, offset, used(req)));

            // Retire a random-length prefix of the outstanding draws.
            let retire = (*lag as usize).min(pending.len());
            if retire > 0 {
                timeline.retire_through(pending[retire - 1].0);
                pending.drain(..retire);
            }
        }

        // Teardown fences the tail once more; let the GPU finish it on its own.
        device.set_mode(RetireMode::Immediate);
        timeline.retire_all();
        stream.destroy().unwrap();
        prop_assert_eq!(device.live_fences(), 0);
    }
}
