use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{DateTime, Utc};
use commitlog_core::{CommitId, Cursor, QuerySelector, StreamName};
use commitlog_events::{Commit, CommitDecoder, Event};
use commitlog_infra::event_store::{ContinuousQuery, InMemoryCommitLog, RangeQuery};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

fn batch(size: usize) -> Vec<Event> {
    (0..size)
        .map(|i| Event::new("Deposited", json!({ "amount": i })).with_metadata("causationId", "cmd"))
        .collect()
}

/// `commits` commits of `size` events, spread round-robin over `streams` streams.
fn seeded_log(commits: usize, size: usize, streams: usize) -> InMemoryCommitLog {
    let log = InMemoryCommitLog::new();
    for n in 0..commits {
        let stream = format!("account-{}", n % streams);
        log.insert(&stream, ts(n as i64 / 4), batch(size)).unwrap();
    }
    log
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap()
}

fn bench_cursor_codec(c: &mut Criterion) {
    let cursor = Cursor::new(ts(1_700_000_000), 42, 3, 8).unwrap();
    let token = cursor.encode();

    c.bench_function("cursor_encode", |b| b.iter(|| black_box(cursor.encode())));
    c.bench_function("cursor_decode", |b| {
        b.iter(|| black_box(Cursor::decode(Some(token.as_str())).unwrap()))
    });
}

fn bench_commit_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_decoding");

    for size in [1usize, 16, 256].iter() {
        let commit = Commit::new(
            CommitId::new(),
            StreamName::new("account-1").unwrap(),
            0,
            ts(1),
            1,
            batch(*size),
        )
        .unwrap();
        let mid = Cursor::for_event(commit.timestamp(), commit.checkpoint(), (*size / 2) as u32, *size as u32);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("from_offset", size), &commit, |b, commit| {
            b.iter(|| black_box(CommitDecoder::from_offset(commit, 1).count()))
        });
        group.bench_with_input(BenchmarkId::new("after_mid_cursor", size), &commit, |b, commit| {
            b.iter(|| black_box(CommitDecoder::after(commit, mid).count()))
        });
    }

    group.finish();
}

fn bench_range_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_query");
    let rt = runtime();

    for commits in [100usize, 1000].iter() {
        let log = seeded_log(*commits, 4, 4);
        let query = RangeQuery::new(log);

        group.throughput(Throughput::Elements(*commits as u64));
        group.bench_with_input(BenchmarkId::new("one_stream", commits), commits, |b, _| {
            b.iter(|| black_box(rt.block_on(query.query("account-1", 1)).unwrap()))
        });
    }

    group.finish();
}

fn bench_continuous_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("continuous_scan");
    let rt = runtime();

    for page_size in [16usize, 256].iter() {
        let log = seeded_log(1000, 4, 8);
        let query = ContinuousQuery::new(log).with_page_size(*page_size);
        let cancel = CancellationToken::new();

        group.throughput(Throughput::Elements(4000));
        group.bench_with_input(BenchmarkId::new("all_streams", page_size), page_size, |b, _| {
            b.iter(|| {
                let outcome = rt
                    .block_on(query.query(&QuerySelector::all(), None, &cancel, |event| {
                        black_box(event);
                        async { Ok(()) }
                    }))
                    .unwrap();
                black_box(outcome)
            })
        });
        group.bench_with_input(BenchmarkId::new("pattern", page_size), page_size, |b, _| {
            let selector = QuerySelector::streams("^account-[0-3]$").unwrap();
            b.iter(|| {
                black_box(
                    rt.block_on(query.query(&selector, None, &cancel, |_| async { Ok(()) }))
                        .unwrap(),
                )
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cursor_codec,
    bench_commit_decoding,
    bench_range_query,
    bench_continuous_scan
);
criterion_main!(benches);
