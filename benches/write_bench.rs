//! Benchmarks for Strata write and barrier paths

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::TempDir;

use strata::{ChangelogProducer, Config, Datum, Row, Table, TableSchema};

const ROWS: i64 = 1_000;

fn open_table(dir: &TempDir, producer: ChangelogProducer) -> Table {
    let config = Config::builder()
        .data_dir(dir.path().join("table"))
        .spill_dir(dir.path().join("spill"))
        .changelog_producer(producer)
        .build();
    let schema = TableSchema::new(&["pt", "k", "v"], &["pt"], &["pt", "k"]).unwrap();
    Table::open(config, schema).unwrap()
}

fn row(pt: i64, k: i64, v: i64) -> Row {
    Row::of(vec![Datum::Int(pt), Datum::Int(k), Datum::Int(v)])
}

/// Write ROWS rows over four partitions and run one full checkpoint
fn write_and_commit(table: &Table) {
    let mut protocol = table.new_write().unwrap();
    let commit = table.new_commit();
    for i in 0..ROWS {
        let row = row(i % 4, i, i * 10);
        let partition = table.schema().partition_of(&row).unwrap();
        protocol.write(partition, 0, row).unwrap();
    }
    let committables = protocol.prepare_barrier(1).unwrap();
    protocol.snapshot_state(1).unwrap();
    let messages = committables
        .iter()
        .filter_map(|c| c.commit_message().cloned())
        .collect();
    commit.commit(1, messages).unwrap();
    protocol.notify_checkpoint_complete(1).unwrap();
    protocol.close().unwrap();
}

fn write_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("checkpoint");
    group.sample_size(20);

    for (name, producer) in [
        ("plain", ChangelogProducer::None),
        ("input_changelog", ChangelogProducer::Input),
        ("lookup_changelog", ChangelogProducer::Lookup),
    ] {
        group.bench_function(name, |b| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().unwrap();
                    let table = open_table(&dir, producer);
                    (dir, table)
                },
                |(_dir, table)| write_and_commit(&table),
                BatchSize::PerIteration,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, write_benchmarks);
criterion_main!(benches);
