mod datasets;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rollupdb::encoding::{decode_record, encode_record};
use rollupdb::{ByteMap, Db, DbConfig, FunctionRegistry, MemRowStore, TableOptions};
use tempfile::TempDir;

use std::sync::Arc;
use std::time::Duration;

const TABLE_SQL: &str = "SELECT requests, MAX(latency) AS latency FROM inbound WHERE status < 500 GROUP BY d0, d1";

const QUERY_SQL: &str = "
SELECT AVG(latency) / (SUM(requests) + 1) AS rate, requests, *
FROM inbound ASOF '-1h' UNTIL '-5m'
WHERE host LIKE 'web-%' AND status IN (200, 204) AND region IS NOT NULL
GROUP BY host, LOWER(region) AS region, CROSSTAB(status), period('1m')
HAVING rate > 0.5
ORDER BY rate DESC
LIMIT 100";

fn make_config(data_dir: &std::path::Path) -> DbConfig {
    DbConfig {
        data_dir: data_dir.to_path_buf(),
        wal_sync: false, // measure the framing path, not the disk
        reader_poll_interval: Duration::from_millis(1),
        throughput_report_interval: None,
        ..Default::default()
    }
}

fn bench_bytemap(c: &mut Criterion) {
    let points = datasets::generate_points(datasets::DEFAULT_SEED, 1_000, 8, 64);
    let mut group = c.benchmark_group("bytemap");

    group.bench_function("encode_1k_dims", |b| {
        b.iter(|| {
            for p in &points {
                black_box(ByteMap::try_from(black_box(&p.dims)).unwrap());
            }
        })
    });

    let encoded: Vec<ByteMap> = points.iter().map(|p| ByteMap::try_from(&p.dims).unwrap()).collect();
    group.bench_function("lookup_1k", |b| {
        b.iter(|| {
            for m in &encoded {
                black_box(m.get(black_box("d5")));
            }
        })
    });

    group.finish();
}

fn bench_record_codec(c: &mut Criterion) {
    let points = datasets::generate_points(datasets::DEFAULT_SEED, 1_000, 8, 64);
    let maps: Vec<(u64, ByteMap, ByteMap)> = points
        .iter()
        .map(|p| (p.timestamp, ByteMap::try_from(&p.dims).unwrap(), ByteMap::try_from(&p.vals).unwrap()))
        .collect();
    let records: Vec<Vec<u8>> = maps
        .iter()
        .map(|(ts, d, v)| encode_record(*ts, d, v).unwrap())
        .collect();

    let mut group = c.benchmark_group("record");
    group.bench_function("encode_1k", |b| {
        b.iter(|| {
            for (ts, d, v) in &maps {
                black_box(encode_record(*ts, d, v).unwrap());
            }
        })
    });
    group.bench_function("decode_1k", |b| {
        b.iter(|| {
            for r in &records {
                black_box(decode_record(black_box(r)).unwrap());
            }
        })
    });
    group.finish();
}

fn bench_sql_compile(c: &mut Criterion) {
    let functions = FunctionRegistry::with_builtins();
    let no_fields = |_: &str| -> Result<Vec<rollupdb::Field>, rollupdb::DbError> { Ok(Vec::new()) };

    c.bench_function("sql_compile_query", |b| {
        b.iter(|| rollupdb::sql::parse(black_box(QUERY_SQL), &functions, &no_fields).unwrap())
    });
}

fn bench_ingest(c: &mut Criterion) {
    let points = datasets::generate_points(datasets::DEFAULT_SEED, 10_000, 4, 16);

    #[derive(Debug)]
    struct Fixture {
        _dir: TempDir,
        db: Db,
        store: Arc<MemRowStore>,
    }

    let mut group = c.benchmark_group("ingest");
    group.sample_size(10);

    group.bench_function("append_10k", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().expect("tempdir");
                let db = Db::open(make_config(dir.path())).expect("db init");
                db.create_stream("inbound").expect("stream");
                Fixture {
                    _dir: dir,
                    db,
                    store: Arc::new(MemRowStore::new()),
                }
            },
            |fx| {
                for p in &points {
                    fx.db.insert_point("inbound", black_box(p)).unwrap();
                }
            },
            BatchSize::LargeInput,
        )
    });

    group.bench_function("append_and_ingest_10k", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().expect("tempdir");
                let db = Db::open(make_config(dir.path())).expect("db init");
                let store = Arc::new(MemRowStore::new());
                db.create_table(TableOptions::new("totals", TABLE_SQL), store.clone())
                    .expect("table");
                Fixture { _dir: dir, db, store }
            },
            |fx| {
                for p in &points {
                    fx.db.insert_point("inbound", black_box(p)).unwrap();
                }
                // Wait for the worker to drain the stream.
                fx.db.close().unwrap();
                black_box(fx.store.row_count().unwrap());
            },
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_bytemap, bench_record_codec, bench_sql_compile, bench_ingest);
criterion_main!(benches);
