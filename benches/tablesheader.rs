#![allow(unused)]
extern crate dotlens;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use dotlens::{metadata::streams::MetadataTablesHeader, RawBuffer, Structure};
use std::hint::black_box;

/// Tables stream header with every table from Module (0x00) to GenericParamConstraint (0x2C)
/// present, as found in large framework assemblies.
fn dense_header() -> Vec<u8> {
    let valid = (1u64 << 0x2D) - 1;

    let mut data = Vec::new();
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&[2, 0, 0x07, 1]);
    data.extend_from_slice(&valid.to_le_bytes());
    data.extend_from_slice(&0x0000_1600_3301_FA00u64.to_le_bytes());
    for table in 0..0x2Du32 {
        data.extend_from_slice(&(0x100 + table * 0x1000).to_le_bytes());
    }

    data
}

/// Tables stream header with a handful of tables, as found in small assemblies.
fn sparse_header() -> Vec<u8> {
    let tables: [(u8, u32); 6] = [(0x00, 1), (0x01, 12), (0x02, 3), (0x06, 9), (0x0A, 7), (0x20, 1)];
    let valid = tables.iter().fold(0u64, |valid, (table, _)| valid | (1 << table));

    let mut data = Vec::new();
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&[2, 0, 0, 1]);
    data.extend_from_slice(&valid.to_le_bytes());
    data.extend_from_slice(&0u64.to_le_bytes());
    for (_, rows) in tables {
        data.extend_from_slice(&rows.to_le_bytes());
    }

    data
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("tables_header");

    for (name, data) in [("dense", dense_header()), ("sparse", sparse_header())] {
        let buffer = RawBuffer::from_mem(data).expect("Failed to create buffer");
        group.throughput(Throughput::Bytes(buffer.len() as u64));
        group.bench_function(format!("decode_{name}"), |b| {
            b.iter(|| {
                let view = MetadataTablesHeader::resolve(black_box(&buffer), 0).unwrap();
                black_box(view.decode().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_live_row_count(c: &mut Criterion) {
    let buffer = RawBuffer::from_mem(dense_header()).expect("Failed to create buffer");
    let view = MetadataTablesHeader::resolve(&buffer, 0).unwrap();

    c.bench_function("tables_header/row_count_live", |b| {
        b.iter(|| {
            let mut total = 0u64;
            for table in 0..0x2D {
                total += u64::from(view.row_count(black_box(table)).unwrap().unwrap_or(0));
            }
            black_box(total)
        });
    });
}

criterion_group!(benches, bench_decode, bench_live_row_count);
criterion_main!(benches);
