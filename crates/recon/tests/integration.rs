use chrono::{NaiveDate, TimeZone, Utc};

use leadsync_recon::engine::{run, Reconciler, RunOptions};
use leadsync_recon::error::{FeedError, StoreError};
use leadsync_recon::feed::{LeadFeed, LeadPage, PagedFeed};
use leadsync_recon::memory::{MemoryStore, StoreOp};
use leadsync_recon::model::{ErrorScope, RawLead, SourceCounters, SourceKey};
use leadsync_recon::{FlushPolicy, LeadStore, RecordOutcome};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 5, 20).unwrap()
}

fn options(flush: FlushPolicy) -> RunOptions {
    RunOptions {
        today: today(),
        not_before: None,
        flush,
    }
}

fn meta() -> SourceKey {
    SourceKey::new("Meta", "meta_form")
}

fn knowlarity() -> SourceKey {
    SourceKey::new("Knowlarity", "knowlarity_call")
}

fn record(id: &str, phone: &str) -> RawLead {
    RawLead {
        external_id: Some(id.into()),
        created_at: Some(Utc.with_ymd_and_hms(2026, 5, 20, 8, 15, 0).unwrap().into()),
        phone: Some(phone.into()),
        name: None,
        payload: serde_json::json!({ "id": id, "phone": phone }),
    }
}

fn one_page(label: &str, records: Vec<RawLead>) -> Vec<Box<dyn LeadFeed>> {
    vec![Box::new(PagedFeed::single(label, records))]
}

fn counters(store: &MemoryStore, key: &SourceKey) -> SourceCounters {
    store.find_source(key).unwrap().unwrap().counters
}

// -------------------------------------------------------------------------
// Cross-source walkthrough
// -------------------------------------------------------------------------

#[test]
fn meta_then_knowlarity_then_meta() {
    let store = MemoryStore::new();

    // First sighting anywhere: canonical lead owned by Meta.
    let s1 = run(
        &store,
        &meta(),
        one_page("form=1", vec![record("m1", "+1 (555) 019-2345")]),
        options(FlushPolicy::PerRecord),
    )
    .unwrap();
    assert_eq!(s1.inserted_new, 1);
    let leads = store.leads();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0].phone_normalized, "5550192345");
    assert_eq!(leads[0].status, "New");
    let meta_id = store.find_source(&meta()).unwrap().unwrap().id;
    assert_eq!(leads[0].source_id, meta_id);
    assert_eq!(counters(&store, &meta()), SourceCounters { total: 1, today: 1 });

    // Knowlarity sees the same contact: sighting, no second lead.
    let s2 = run(
        &store,
        &knowlarity(),
        one_page("calls", vec![record("k1", "5550192345")]),
        options(FlushPolicy::EndOfRun),
    )
    .unwrap();
    assert_eq!(s2.cross_source, 1);
    assert_eq!(store.leads().len(), 1);
    let sightings = store.sightings();
    assert_eq!(sightings.len(), 1);
    assert_eq!(sightings[0].lead_id, leads[0].id);
    assert_eq!(Some(sightings[0].source_id), s2.source_id);
    assert!(!sightings[0].is_primary);
    assert_eq!(counters(&store, &knowlarity()), SourceCounters { total: 1, today: 1 });

    // Meta again: the foreign sighting does not own the key, the Meta lead
    // does, so this is a same-source repeat.
    let s3 = run(
        &store,
        &meta(),
        one_page("form=1", vec![record("m2", "555 019 2345")]),
        options(FlushPolicy::PerRecord),
    )
    .unwrap();
    assert_eq!(s3.duplicate_same_source, 1);
    assert_eq!(store.leads().len(), 1);
    assert_eq!(store.sightings().len(), 1);
    assert_eq!(counters(&store, &meta()), SourceCounters { total: 1, today: 1 });
}

#[test]
fn replay_is_idempotent() {
    let store = MemoryStore::new();
    let batch = || {
        vec![
            record("a", "5550000001"),
            record("b", "5550000002"),
            record("c", "+91 55500 00003"),
        ]
    };

    let first = run(&store, &meta(), one_page("p", batch()), options(FlushPolicy::EndOfRun)).unwrap();
    assert_eq!(first.inserted_new, 3);

    let second = run(&store, &meta(), one_page("p", batch()), options(FlushPolicy::EndOfRun)).unwrap();
    assert_eq!(second.duplicate_same_source, 3);
    assert_eq!(second.inserted_new, 0);
    assert_eq!(second.cross_source, 0);
    assert_eq!(store.leads().len(), 3);
    assert!(store.sightings().is_empty());
    assert_eq!(counters(&store, &meta()).total, 3);
}

#[test]
fn repeat_cross_source_sightings_are_kept() {
    let store = MemoryStore::new();
    run(&store, &meta(), one_page("f", vec![record("m", "5550000009")]), options(FlushPolicy::PerRecord)).unwrap();
    for _ in 0..2 {
        run(
            &store,
            &knowlarity(),
            one_page("calls", vec![record("k", "5550000009")]),
            options(FlushPolicy::EndOfRun),
        )
        .unwrap();
    }
    assert_eq!(store.sightings().len(), 2);
    assert_eq!(counters(&store, &knowlarity()).total, 2);
}

// -------------------------------------------------------------------------
// Partial failures
// -------------------------------------------------------------------------

#[test]
fn failed_insert_errors_one_record_only() {
    let store = MemoryStore::new();
    let mut recon = Reconciler::begin(&store, &meta(), options(FlushPolicy::EndOfRun)).unwrap();

    store.fail_next(StoreOp::InsertLead, StoreError::Unavailable("write timeout".into()));
    let outcomes: Vec<_> = ["5550000001", "5550000002", "5550000003"]
        .iter()
        .enumerate()
        .map(|(i, p)| recon.process_record(record(&format!("r{i}"), p)))
        .collect();
    assert!(matches!(outcomes[0], RecordOutcome::Errored(_)));
    assert!(matches!(outcomes[1], RecordOutcome::Created(_)));
    assert!(matches!(outcomes[2], RecordOutcome::Created(_)));

    let summary = recon.finish();
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.inserted_new, 2);
    assert_eq!(summary.errors[0].external_id.as_deref(), Some("r0"));
    assert!(summary.errors[0].message.contains("write timeout"));
    assert_eq!(counters(&store, &meta()).total, 2);
}

#[test]
fn failed_sighting_insert_is_not_counted() {
    let store = MemoryStore::new();
    run(&store, &meta(), one_page("f", vec![record("m", "5550000001")]), options(FlushPolicy::PerRecord)).unwrap();

    store.fail_next(StoreOp::InsertSighting, StoreError::Unavailable("gone".into()));
    let summary = run(
        &store,
        &knowlarity(),
        one_page("calls", vec![record("k", "5550000001")]),
        options(FlushPolicy::EndOfRun),
    )
    .unwrap();
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.counter_delta.total, 0);
    assert_eq!(counters(&store, &knowlarity()).total, 0);
}

#[test]
fn mid_run_fetch_failure_still_flushes_counters() {
    let store = MemoryStore::new();
    let feed = PagedFeed::new(
        "calls",
        vec![
            Ok(LeadPage {
                records: vec![record("a", "5550000001"), record("b", "5550000002")],
                offset: 0,
                total_count: Some(10),
                has_more: true,
            }),
            Err(FeedError::new("HTTP 503 after 3 retries").with_context("offset=2")),
        ],
    );
    let feeds: Vec<Box<dyn LeadFeed>> = vec![Box::new(feed)];
    let summary = run(&store, &knowlarity(), feeds, options(FlushPolicy::EndOfRun)).unwrap();

    assert_eq!(summary.inserted_new, 2);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].scope, ErrorScope::Page);
    assert!(summary.counters_synced);
    assert_eq!(counters(&store, &knowlarity()).total, 2);
}

#[test]
fn failing_feed_does_not_stop_next_feed() {
    let store = MemoryStore::new();
    let feeds: Vec<Box<dyn LeadFeed>> = vec![
        Box::new(PagedFeed::new("form=1", vec![Err(FeedError::new("bad token"))])),
        Box::new(PagedFeed::single("form=2", vec![record("x", "5550000007")])),
    ];
    let summary = run(&store, &meta(), feeds, options(FlushPolicy::PerRecord)).unwrap();
    assert_eq!(summary.inserted_new, 1);
    assert_eq!(summary.errors[0].context.as_deref(), Some("form=1"));
}

#[test]
fn counter_sync_failure_is_reported_not_undone() {
    let store = MemoryStore::new();
    let mut recon = Reconciler::begin(&store, &knowlarity(), options(FlushPolicy::EndOfRun)).unwrap();
    recon.process_record(record("a", "5550000001"));
    store.fail_next(StoreOp::WriteCounters, StoreError::Unavailable("locked".into()));
    let summary = recon.finish();

    assert!(!summary.counters_synced);
    assert_eq!(summary.inserted_new, 1);
    assert_eq!(summary.counter_delta.total, 1);
    assert_eq!(summary.errors.last().map(|e| e.scope), Some(ErrorScope::Counters));
    assert_eq!(store.leads().len(), 1);
    assert_eq!(counters(&store, &knowlarity()).total, 0);
}

#[test]
fn per_record_flush_failure_recovers_at_end() {
    let store = MemoryStore::new();
    store.fail_next(StoreOp::WriteCounters, StoreError::Unavailable("blip".into()));
    let summary = run(
        &store,
        &meta(),
        one_page("f", vec![record("a", "5550000001"), record("b", "5550000002")]),
        options(FlushPolicy::PerRecord),
    )
    .unwrap();
    assert!(summary.counters_synced);
    assert_eq!(counters(&store, &meta()), SourceCounters { total: 2, today: 2 });
}

#[test]
fn all_records_failing_still_returns_summary() {
    let store = MemoryStore::new();
    let mut recon = Reconciler::begin(&store, &meta(), options(FlushPolicy::EndOfRun)).unwrap();
    for i in 0..3 {
        store.fail_next(StoreOp::LeadsByPhone, StoreError::Unavailable("down".into()));
        recon.process_record(record(&format!("r{i}"), "5550000001"));
    }
    let summary = recon.finish();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.errored, 3);
    assert_eq!(summary.tally_total(), summary.processed);
    assert!(summary.counters_synced);
}

// -------------------------------------------------------------------------
// Store-level uniqueness and attribution
// -------------------------------------------------------------------------

#[test]
fn insert_conflict_falls_back_to_sighting() {
    let store = MemoryStore::with_unique_phone();
    let ks = store.insert_source(&knowlarity()).unwrap();
    let mut recon = Reconciler::begin(&store, &meta(), options(FlushPolicy::EndOfRun)).unwrap();

    // Another pipeline inserts the lead between our lookup and our insert.
    let rival = store.seed_lead(ks.id, "5550000001", Some("2026-05-20T08:00:00Z"));
    store.miss_next_lead_lookup();
    let outcome = recon.process_record(record("m", "5550000001"));
    assert!(matches!(outcome, RecordOutcome::Sighted { lead_id, .. } if lead_id == rival));
    assert_eq!(store.leads().len(), 1);

    let summary = recon.finish();
    assert_eq!(summary.cross_source, 1);
    assert_eq!(summary.errored, 0);
}

#[test]
fn insert_conflict_with_own_lead_is_same_source() {
    let store = MemoryStore::with_unique_phone();
    let mut recon = Reconciler::begin(&store, &meta(), options(FlushPolicy::EndOfRun)).unwrap();
    let own = recon.source().id;
    store.seed_lead(own, "5550000002", None);
    store.miss_next_lead_lookup();
    assert_eq!(recon.process_record(record("m", "5550000002")), RecordOutcome::SameSource);
}

#[test]
fn cross_source_picks_latest_foreign_lead() {
    let store = MemoryStore::new();
    let k = store.insert_source(&knowlarity()).unwrap();
    let other = store.insert_source(&SourceKey::new("Website", "web_form")).unwrap();
    store.seed_lead(k.id, "5550000001", Some("2026-01-01T00:00:00Z"));
    let newest = store.seed_lead(other.id, "5550000001", Some("2026-04-01 12:00:00"));
    store.seed_lead(k.id, "5550000001", None);

    let mut recon = Reconciler::begin(&store, &meta(), options(FlushPolicy::EndOfRun)).unwrap();
    let outcome = recon.process_record(record("m", "5550000001"));
    assert!(matches!(outcome, RecordOutcome::Sighted { lead_id, .. } if lead_id == newest));
}

#[test]
fn stale_window_skips_before_classifying() {
    let store = MemoryStore::new();
    let floor = Utc.with_ymd_and_hms(2026, 5, 20, 9, 0, 0).unwrap();
    let opts = options(FlushPolicy::PerRecord).with_not_before(floor);
    store.fail_next(StoreOp::LeadsByPhone, StoreError::Unavailable("should not be queried".into()));

    let summary = run(&store, &meta(), one_page("f", vec![record("early", "5550000001")]), opts).unwrap();
    assert_eq!(summary.skipped_stale, 1);
    assert_eq!(summary.errored, 0);
}
