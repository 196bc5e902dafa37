//! Performance benchmarks for deltapager
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use deltapager::config::Strategy;
use deltapager::limiter::Unlimited;
use deltapager::pagers::{
    batch_delta_enumerate_items, get_added_and_removed_item_ids, AddedAndRemovedOptions,
    ADDITIONAL_DATA_REMOVED,
};
use deltapager::replay::{Fixture, FixturePage, ReplayItem};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

/// Build a page where every tenth item is removed
fn create_page(prefix: &str, size: usize) -> Vec<ReplayItem> {
    (0..size)
        .map(|i| {
            let mut item = ReplayItem::new(format!("{}-{}", prefix, i));
            item.last_modified = chrono::DateTime::from_timestamp(1_700_000_000 + i as i64, 0);
            if i % 10 == 0 {
                item.additional_data
                    .insert(ADDITIONAL_DATA_REMOVED.into(), serde_json::json!({"reason": "deleted"}));
                item.deleted_date_time = item.last_modified;
            }
            item
        })
        .collect()
}

fn create_fixture(pages: usize, page_size: usize) -> Fixture {
    let pages: Vec<FixturePage> = (0..pages)
        .map(|p| FixturePage::items(create_page(&format!("page{}", p), page_size)))
        .collect();

    Fixture {
        delta_link: "delta".into(),
        delta_pages: pages.clone(),
        pages,
        valid_mod_times: true,
        ..Default::default()
    }
}

fn bench_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify_page");

    for size in [100usize, 1_000, 10_000] {
        let page = create_page("bench", size);
        group.throughput(Throughput::Elements(size as u64));

        for strategy in [Strategy::AddAll, Strategy::AdditionalData, Strategy::DeletedDateTime] {
            let classify = strategy.classify_fn::<ReplayItem>();
            group.bench_with_input(
                BenchmarkId::new(strategy.name(), size),
                &page,
                |b, page| {
                    b.iter(|| black_box(classify(page, &[]).unwrap()));
                },
            );
        }
    }

    group.finish();
}

fn bench_batch_enumeration(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let fixture = create_fixture(50, 200);

    c.bench_function("batch_delta_50_pages", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ctx = CancellationToken::new();
                black_box(
                    batch_delta_enumerate_items(&ctx, fixture.delta_pager(), Arc::new(Unlimited), "prev")
                        .await
                        .unwrap(),
                )
            })
        });
    });
}

fn bench_added_and_removed(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let fixture = create_fixture(50, 200);
    let options = AddedAndRemovedOptions {
        prev_delta_link: "prev".into(),
        can_make_delta_queries: true,
        item_limit: 0,
    };

    c.bench_function("added_and_removed_50_pages", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ctx = CancellationToken::new();
                black_box(
                    get_added_and_removed_item_ids(
                        &ctx,
                        Arc::new(Unlimited),
                        fixture.pager(),
                        fixture.delta_pager(),
                        &options,
                        Strategy::AdditionalData.classify_fn(),
                        &[],
                    )
                    .await
                    .unwrap(),
                )
            })
        });
    });
}

fn bench_fixture_load(c: &mut Criterion) {
    let mut file = NamedTempFile::new().unwrap();
    let json = serde_json::to_string(&create_fixture(20, 500)).unwrap();
    file.write_all(json.as_bytes()).unwrap();

    c.bench_function("load_fixture_20x500", |b| {
        b.iter(|| black_box(Fixture::from_file(file.path()).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_strategies,
    bench_batch_enumeration,
    bench_added_and_removed,
    bench_fixture_load
);

criterion_main!(benches);
