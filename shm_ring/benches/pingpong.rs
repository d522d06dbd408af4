//! Benchmark for ring channel round-trip latency.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use shm_ring::{RingChannel, Shutdown};
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

const CAPACITY: u32 = 8;

fn bench_request_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_request");
    group.throughput(Throughput::Elements(1));

    group.bench_function("u64", |b| {
        let name = format!("/ring_bench_{}", Uuid::now_v7());
        let server = Arc::new(unsafe { RingChannel::<u64, u64>::create(&name, CAPACITY) }.unwrap());
        let shutdown = Shutdown::new();

        let (srv, stop) = (server.clone(), shutdown.clone());
        let server_thread = thread::spawn(move || srv.serve(&stop, |ex| ex.respond(ex.request() + 1)));

        let client = unsafe { RingChannel::<u64, u64>::open(&name) }.unwrap();
        let requester = Shutdown::new();
        for _ in 0..1000 {
            client.request(0, &requester).unwrap();
        }
        b.iter(|| black_box(client.request(black_box(42u64), &requester).unwrap()));

        shutdown.trigger();
        server_thread.join().unwrap().unwrap();
    });

    group.bench_function("sector", |b| {
        let name = format!("/ring_bench_{}", Uuid::now_v7());
        let server =
            Arc::new(unsafe { RingChannel::<i32, [u8; 512]>::create(&name, CAPACITY) }.unwrap());
        let shutdown = Shutdown::new();

        let (srv, stop) = (server.clone(), shutdown.clone());
        let server_thread = thread::spawn(move || {
            srv.serve(&stop, |ex| ex.respond([ex.request() as u8; 512]))
        });

        let client = unsafe { RingChannel::<i32, [u8; 512]>::open(&name) }.unwrap();
        let requester = Shutdown::new();
        b.iter(|| black_box(client.request(black_box(7), &requester).unwrap()));

        shutdown.trigger();
        server_thread.join().unwrap().unwrap();
    });

    group.finish();
}

criterion_group!(benches, bench_request_latency);
criterion_main!(benches);
