use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rfs::waiting_room::{IdlePolicy, Request, SharedHandler, WaitingRoom};
use rfs::Result;

const SUBMISSIONS: usize = 256;

/// submits `SUBMISSIONS` requests spread over `keys` keys, then drains the room
fn submit_and_drain(keys: usize) {
    let room = WaitingRoom::new(IdlePolicy::Persist);
    let done = Arc::new(AtomicUsize::new(0));
    let handler: SharedHandler<usize> = {
        let done = done.clone();
        Arc::new(move |n: usize| -> Result<()> {
            done.fetch_add(n & 1, Ordering::Relaxed);
            Ok(())
        })
    };
    let names: Vec<String> = (0..keys).map(|k| format!("file-{}", k)).collect();

    for n in 0..SUBMISSIONS {
        room.submit(&names[n % keys], Request::new(n), handler.clone())
            .unwrap();
    }
    room.shutdown_all();
    assert_eq!(done.load(Ordering::Relaxed), SUBMISSIONS / 2);
}

fn bench_waiting_room(c: &mut Criterion) {
    let mut group = c.benchmark_group("waiting_room");
    for keys in [1_usize, 8, 64].iter() {
        group.bench_with_input(BenchmarkId::new("submit_and_drain", keys), keys, |b, &keys| {
            b.iter(|| submit_and_drain(keys))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_waiting_room);
criterion_main!(benches);
