//! Benchmark suite for slotwatch hot paths.
//!
//! Classification runs inside the response interception hook, once per
//! weekly search click, so it has to stay cheap on large bodies:
//! - Response classification (each priority branch)
//! - Claim link extraction from day pages
//! - Period parsing of the displayed date range
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Save baseline for comparison
//! cargo bench -- --save-baseline main
//!
//! # Compare against baseline
//! cargo bench -- --baseline main
//! ```

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use slotwatch::agent::parse_period;
use slotwatch::classifier::{MarkerExtractor, PatternExtractor, ResponseClassifier};

const SLOT_LINK: &str =
    r#"<a href="/obs?execution=e1s2&amp;_eventId=searchForDaySlots&amp;date=2026-03-24">Tue</a>"#;
const PERIOD: &str =
    "<p>Number of available tests between 23 <span>March</span> 2026 &ndash; 29 March 2026</p>";

/// A weekly search body padded with `rows` filler table rows.
fn weekly_body(rows: usize, with_slot: bool) -> String {
    let mut body = String::from("<html><body>");
    body.push_str(PERIOD);
    for i in 0..rows {
        body.push_str(&format!(
            "<tr class=\"day\"><td>Day {i}</td><td>No tests available</td></tr>"
        ));
    }
    if with_slot {
        body.push_str(SLOT_LINK);
    }
    body.push_str("</body></html>");
    body
}

/// A day page with `links` claim links.
fn day_page(links: usize) -> String {
    (0..links)
        .map(|i| {
            format!(
                r#"<tr><td>08:{i:02}</td><td><a id="reserve_{i}" href="/obs?execution=e1s3&amp;_eventId=reserveSlot&amp;slot={i}">Reserve</a></td></tr>"#
            )
        })
        .collect()
}

// ============================================================================
// Classification Benchmarks
// ============================================================================

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let classifier = ResponseClassifier::new();
    let deadline = NaiveDate::from_ymd_opt(2026, 12, 31).expect("valid date");

    for rows in [10, 200, 2000] {
        let slot = weekly_body(rows, true);
        let empty = weekly_body(rows, false);

        group.throughput(Throughput::Bytes(slot.len() as u64));
        group.bench_with_input(BenchmarkId::new("slot_found", rows), &slot, |b, body| {
            b.iter(|| black_box(classifier.classify(black_box(body), deadline)));
        });
        group.bench_with_input(BenchmarkId::new("no_slot", rows), &empty, |b, body| {
            b.iter(|| black_box(classifier.classify(black_box(body), deadline)));
        });
    }

    let rate_limited = format!("{}<title>Pardon Our Interruption</title>", weekly_body(200, false));
    group.bench_function("rate_limited", |b| {
        b.iter(|| black_box(classifier.classify(black_box(&rate_limited), deadline)));
    });

    group.finish();
}

// ============================================================================
// Extraction Benchmarks
// ============================================================================

fn bench_claim_links(c: &mut Criterion) {
    let mut group = c.benchmark_group("claim_links");

    for links in [1, 10, 50] {
        let page = day_page(links);
        group.throughput(Throughput::Elements(links as u64));
        group.bench_with_input(BenchmarkId::from_parameter(links), &page, |b, page| {
            b.iter(|| black_box(MarkerExtractor.claim_links(black_box(page))));
        });
    }

    group.finish();
}

fn bench_parse_period(c: &mut Criterion) {
    c.bench_function("parse_period", |b| {
        b.iter(|| black_box(parse_period(black_box("23rd March 2026 – 29th March 2026"))));
    });
}

criterion_group!(benches, bench_classify, bench_claim_links, bench_parse_period);
criterion_main!(benches);
