//! Benchmarks for the blob store and its label index
//!
//! Run with: cargo bench

use mediastore::blob::{date, parse_external_key, BlobOptions, Info, TimeRange};
use mediastore::index::range_value::{encode_label_value, encode_label_value_blob};
use mediastore::index::RangeValue;
use mediastore::label::{find_set_matches, Matcher};
use mediastore::storage::{Ingester, Manager, Store};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::io::Write;
use tempfile::tempdir;

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let info = Info::from_str_content("x", &BlobOptions::new().at(date(2022, 5, 15)));
    let key = info.external_key();

    group.bench_function("format_external_key", |b| {
        b.iter(|| black_box(&info).external_key())
    });

    group.bench_function("parse_external_key", |b| {
        b.iter(|| parse_external_key(black_box(&key), "0").unwrap())
    });

    group.bench_function("encode_label_value", |b| {
        b.iter(|| encode_label_value(black_box("_label"), "mediaType", "image/jpeg"))
    });

    let rv = encode_label_value_blob("image/jpeg", &key);
    group.bench_function("decode_range_value", |b| {
        b.iter(|| RangeValue::decode(black_box(&rv)).unwrap().blob_id())
    });

    group.bench_function("find_set_matches", |b| {
        b.iter(|| find_set_matches(black_box(r"image/jpeg|image/png|video/mp4|text\.plain")))
    });

    group.finish();
}

fn bench_store(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("store");

    group.bench_function("put_single", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let dir = tempdir().unwrap();
                let store = Store::open_dir(dir.path()).await.unwrap();
                let t = date(2022, 5, 15);

                let start = std::time::Instant::now();

                for i in 0..iters {
                    let opts = BlobOptions::new()
                        .at(t + i as i64)
                        .label("mediaType", "image/jpeg");
                    let mut w = store.writer(&opts).await.unwrap();
                    w.write_all(&i.to_be_bytes()).unwrap();
                    w.commit(8, None, &BlobOptions::new()).await.unwrap();
                }

                let elapsed = start.elapsed();
                store.shutdown().await.unwrap();
                elapsed
            })
        });
    });

    let count = 1000u64;
    group.throughput(Throughput::Elements(count));
    group.bench_function("query_day_1000", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let dir = tempdir().unwrap();
                let store = Store::open_dir(dir.path()).await.unwrap();
                let t = date(2022, 5, 15);

                // Setup: a day of frames from two cameras
                for i in 0..count {
                    let opts = BlobOptions::new()
                        .at(t + i as i64 * 60_000)
                        .label("mediaType", "image/jpeg")
                        .label("camera", (i % 2).to_string());
                    let mut w = store.writer(&opts).await.unwrap();
                    w.write_all(&i.to_be_bytes()).unwrap();
                    w.commit(8, None, &BlobOptions::new()).await.unwrap();
                }

                let range = TimeRange::new(t, t + 24 * 3_600_000);
                let matchers = [
                    Matcher::equal("mediaType", "image/jpeg"),
                    Matcher::equal("camera", "1"),
                ];

                let start = std::time::Instant::now();

                for _ in 0..iters {
                    let _ = store.query(black_box(range), "0", &matchers).await.unwrap();
                }

                let elapsed = start.elapsed();
                store.shutdown().await.unwrap();
                elapsed
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_codec, bench_store);
criterion_main!(benches);
