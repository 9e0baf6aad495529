use std::sync::mpsc;
use std::time::Duration;

use bytecheck::CheckBytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use mmap_bridge::{Bridge, BridgeOptions};
use pprof::criterion::PProfProfiler;
use rkyv::{Archive, Deserialize, Serialize};

/// Example data-structure broadcast between participants
#[derive(Archive, Deserialize, Serialize, Debug, PartialEq)]
#[archive_attr(derive(CheckBytes))]
pub struct HelloWorld {
    pub version: u32,
    pub messages: Vec<String>,
}

pub fn bench_bridge(c: &mut Criterion) {
    let path = "/dev/shm/mmap_bridge_bench";
    let data = HelloWorld {
        version: 7,
        messages: vec!["Hello".to_string(), "World".to_string(), "!".to_string()],
    };

    let (tx, rx) = mpsc::channel();
    let mut writer = Bridge::<HelloWorld>::open(path).unwrap();
    let reader = Bridge::<HelloWorld>::with_params(
        path,
        BridgeOptions::default().poll_interval(Duration::from_micros(10)),
        move |value: HelloWorld| {
            let _ = tx.send(value.version);
        },
    )
    .unwrap();

    let mut group = c.benchmark_group("bridge");
    group.throughput(Throughput::Elements(1));

    group.bench_function("write", |b| {
        b.iter(|| {
            writer.write(black_box(&data)).expect("failed to write data");
        })
    });

    group.bench_function("read", |b| {
        b.iter(|| {
            let value = reader.read().unwrap().unwrap();
            assert_eq!(value.version, data.version);
        })
    });

    // drain notifications of the write benchmark
    std::thread::sleep(Duration::from_millis(10));
    while rx.try_recv().is_ok() {}

    group.bench_function("write_and_notify", |b| {
        b.iter(|| {
            writer.write(black_box(&data)).expect("failed to write data");
            let version = rx.recv().unwrap();
            assert_eq!(version, data.version);
        })
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().with_profiler(PProfProfiler::new(100, pprof::criterion::Output::Protobuf));
    targets = bench_bridge
}
criterion_main!(benches);
