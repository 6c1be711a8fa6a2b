// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use logmill::queue::ingest_queue;
use logmill::stats::SinkStats;
use logmill::{Entry, FileSink, Level, LineFormatter, RecordFormatter, SinkConfig};
use std::io;
use std::sync::Arc;
use std::time::Duration;

fn benchmark_queue_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("RecordSender::enqueue");

    for size in [64usize, 512, 4096] {
        let record = vec![b'x'; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &record, |b, record| {
            // Large enough that the benchmark never measures the drop path.
            let (sender, mut receiver) = ingest_queue(1 << 20, Arc::new(SinkStats::default()));
            b.iter(|| {
                sender.enqueue(black_box(record.as_slice()));
                receiver.try_recv()
            });
        });
    }

    group.finish();
}

fn benchmark_sink_enqueue(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let sink = {
        let _guard = runtime.enter();
        FileSink::builder(SinkConfig::default())
            .with_fallback(Box::new(io::sink()))
            .start()
            .unwrap()
    };

    c.bench_function("FileSink::enqueue", |b| {
        b.iter(|| sink.enqueue(black_box("GET /health 200 0.4ms\n")));
    });

    runtime
        .block_on(sink.shutdown(Duration::from_secs(5)))
        .unwrap();
}

fn benchmark_line_format(c: &mut Criterion) {
    let formatter = LineFormatter::new(1).with_utc();
    formatter.set_trace_id("0a0000016553f1001234abcd123456b0");
    let entry = Entry::new(Level::Info, "request served")
        .with_tag("_com_request_out")
        .with_field("path", "/api/v1/orders")
        .with_field("status", 200)
        .with_field("proc_time", 0.42);

    c.bench_function("LineFormatter::format", |b| {
        b.iter(|| formatter.format(black_box(&entry)).unwrap());
    });
}

criterion_group!(
    benches,
    benchmark_queue_enqueue,
    benchmark_sink_enqueue,
    benchmark_line_format
);
criterion_main!(benches);
