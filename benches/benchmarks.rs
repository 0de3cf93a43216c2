//! Benchmarks for SSDB request encoding and response decoding

use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use ssdb_client::{args, codec, Arg};
use tokio::io::BufReader;
use tokio::runtime::Runtime;

fn response_wire(frames: usize, frame_len: usize) -> Vec<u8> {
    let body = vec![b'x'; frame_len];
    let data: Vec<Arg> = (0..frames).map(|_| Arg::from(body.clone())).collect();
    codec::encode("ok", &data).unwrap().to_vec()
}

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_encode");
    group.throughput(Throughput::Elements(1));

    let small = args!["user:1", "name", "ada"];
    let mut buf = BytesMut::with_capacity(8 * 1024);
    group.bench_function("hset_small", |b| {
        b.iter(|| {
            buf.clear();
            codec::encode_command("hset", &small, &mut buf).unwrap();
        })
    });

    let keys: Vec<String> = (0..100).map(|i| format!("key_{}", i)).collect();
    let multi = vec![Arg::from("h"), Arg::from(keys)];
    group.bench_function("multi_hget_100", |b| {
        b.iter(|| {
            buf.clear();
            codec::encode_command("multi_hget", &multi, &mut buf).unwrap();
        })
    });

    group.finish();
}

fn benchmark_decode(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("codec_decode");

    for (frames, frame_len) in [(1usize, 16usize), (100, 16), (1, 64 * 1024)] {
        let wire = response_wire(frames, frame_len);
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_function(format!("{}x{}", frames, frame_len), |b| {
            b.iter(|| {
                rt.block_on(async {
                    let mut reader = BufReader::new(&wire[..]);
                    codec::read_response(&mut reader).await.unwrap()
                })
            })
        });
    }

    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .sample_size(50)
        .measurement_time(std::time::Duration::from_secs(5));
    targets = benchmark_encode, benchmark_decode
);
criterion_main!(benches);
