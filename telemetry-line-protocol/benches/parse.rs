use std::io::Read as _;

use chrono::{TimeZone as _, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use telemetry_line_protocol::{Parser, Reader};

const LINE: &[u8] = b"cpu,host=server01,region=us-west,cpu=cpu-total usage_idle=98.4,usage_user=1.2,usage_system=0.4,processes=312i,state=\"running\" 1481032190000000000\n";

fn batch(lines: usize) -> Vec<u8> {
    LINE.repeat(lines)
}

fn parse_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    let parser = Parser::new().with_default_time(Utc.timestamp_nanos(0));

    let line = &LINE[..LINE.len() - 1];
    group.throughput(Throughput::Bytes(line.len() as u64));
    group.bench_function("line", |b| b.iter(|| parser.parse_line(line)));

    let input = batch(1000);
    group.throughput(Throughput::Bytes(input.len() as u64));
    group.bench_function("batch of 1000", |b| b.iter(|| parser.parse(&input)));

    group.finish();
}

fn reader_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("reader");
    let metrics = Parser::new().parse(&batch(1000)).unwrap().into_metrics();

    for buf_len in [64, 4096] {
        group.bench_function(format!("1000 metrics, {buf_len} byte buffer"), |b| {
            b.iter_batched(
                || Reader::new(metrics.clone()),
                |mut reader| {
                    let mut buf = vec![0u8; buf_len];
                    let mut total = 0;
                    loop {
                        let n = reader.read(&mut buf).unwrap();
                        if n == 0 {
                            break total;
                        }
                        total += n;
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, parse_benchmark, reader_benchmark);
criterion_main!(benches);
