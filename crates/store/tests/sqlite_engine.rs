use std::cell::Cell;

use chrono::{NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use leadsync_recon::engine::{run, Reconciler, RunOptions};
use leadsync_recon::feed::{LeadFeed, PagedFeed};
use leadsync_recon::model::{
    LeadId, LeadMatch, NewLead, NewSighting, RawLead, SightingId, SourceCounters,
    SourceDescriptor, SourceId, SourceKey,
};
use leadsync_recon::{FlushPolicy, LeadStore, PhoneKey, RecordOutcome, StoreError};
use leadsync_store::SqliteStore;

fn options(flush: FlushPolicy) -> RunOptions {
    RunOptions {
        today: NaiveDate::from_ymd_opt(2026, 8, 3).unwrap(),
        not_before: None,
        flush,
    }
}

fn record(id: &str, phone: &str) -> RawLead {
    RawLead {
        external_id: Some(id.into()),
        created_at: Some(Utc.with_ymd_and_hms(2026, 8, 3, 11, 0, 0).unwrap().into()),
        phone: Some(phone.into()),
        name: Some("Ravi Kumar".into()),
        payload: serde_json::json!({ "uuid": id, "customer_number": phone }),
    }
}

fn feeds(records: Vec<RawLead>) -> Vec<Box<dyn LeadFeed>> {
    vec![Box::new(PagedFeed::single("test", records))]
}

#[test]
fn state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/leads.db");
    let meta = SourceKey::new("Meta", "meta_form");
    let knowlarity = SourceKey::new("Knowlarity", "knowlarity_call");

    {
        let store = SqliteStore::open(&path).unwrap();
        let s = run(&store, &meta, feeds(vec![record("m1", "+1 555 019 2345")]), options(FlushPolicy::PerRecord)).unwrap();
        assert_eq!(s.inserted_new, 1);
    }

    let store = SqliteStore::open(&path).unwrap();
    let s = run(&store, &knowlarity, feeds(vec![record("k1", "5550192345")]), options(FlushPolicy::EndOfRun)).unwrap();
    assert_eq!(s.cross_source, 1);

    let (leads, sightings) = store.totals().unwrap();
    assert_eq!((leads, sightings), (1, 1));

    let sources = store.list_sources().unwrap();
    assert_eq!(sources.len(), 2);
    for src in &sources {
        assert_eq!(src.counters, SourceCounters { total: 1, today: 1 });
    }

    let meta_row = store.find_source(&meta).unwrap().unwrap();
    let lead_id = store
        .leads_by_phone(&leadsync_recon::normalize_phone(Some("5550192345")).unwrap())
        .unwrap()[0]
        .id;
    let lead = store.lead(lead_id).unwrap().unwrap();
    assert_eq!(lead.source_id, meta_row.id);
    assert_eq!(lead.full_name, "Ravi Kumar");

    let hist = store.sightings_for_lead(lead_id).unwrap();
    assert_eq!(hist.len(), 1);
    assert!(!hist[0].is_primary);
    assert_eq!(hist[0].payload["uuid"], "k1");
}

#[test]
fn replay_against_sqlite_is_idempotent() {
    let store = SqliteStore::open_in_memory().unwrap();
    let key = SourceKey::new("Knowlarity", "knowlarity_call");
    let batch = || vec![record("a", "9876543210"), record("b", "+91 98765 43211")];

    run(&store, &key, feeds(batch()), options(FlushPolicy::EndOfRun)).unwrap();
    let second = run(&store, &key, feeds(batch()), options(FlushPolicy::EndOfRun)).unwrap();

    assert_eq!(second.duplicate_same_source, 2);
    assert_eq!(store.totals().unwrap(), (2, 0));
    assert_eq!(store.find_source(&key).unwrap().unwrap().counters.total, 2);
}

/// Delegates to SQLite but hides existing leads from the next lookup, as if
/// another pipeline inserted between our lookup and our insert.
struct RacingStore<'a> {
    inner: &'a SqliteStore,
    hide_next_lookup: Cell<bool>,
}

impl LeadStore for RacingStore<'_> {
    fn find_source(&self, key: &SourceKey) -> Result<Option<SourceDescriptor>, StoreError> {
        self.inner.find_source(key)
    }

    fn insert_source(&self, key: &SourceKey) -> Result<SourceDescriptor, StoreError> {
        self.inner.insert_source(key)
    }

    fn list_sources(&self) -> Result<Vec<SourceDescriptor>, StoreError> {
        self.inner.list_sources()
    }

    fn leads_by_phone(&self, phone: &PhoneKey) -> Result<Vec<LeadMatch>, StoreError> {
        if self.hide_next_lookup.replace(false) {
            return Ok(Vec::new());
        }
        self.inner.leads_by_phone(phone)
    }

    fn insert_lead(&self, lead: &NewLead) -> Result<LeadId, StoreError> {
        self.inner.insert_lead(lead)
    }

    fn insert_sighting(&self, sighting: &NewSighting) -> Result<SightingId, StoreError> {
        self.inner.insert_sighting(sighting)
    }

    fn read_counters(&self, source_id: SourceId) -> Result<SourceCounters, StoreError> {
        self.inner.read_counters(source_id)
    }

    fn write_counters(&self, source_id: SourceId, counters: SourceCounters) -> Result<(), StoreError> {
        self.inner.write_counters(source_id, counters)
    }
}

#[test]
fn unique_index_turns_race_into_sighting() {
    let db = SqliteStore::open_in_memory().unwrap();
    run(&db, &SourceKey::new("Meta", "meta_form"), feeds(vec![record("m", "5550000001")]), options(FlushPolicy::PerRecord)).unwrap();

    let racing = RacingStore {
        inner: &db,
        hide_next_lookup: Cell::new(true),
    };
    let mut recon = Reconciler::begin(
        &racing,
        &SourceKey::new("Knowlarity", "knowlarity_call"),
        options(FlushPolicy::EndOfRun),
    )
    .unwrap();
    let outcome = recon.process_record(record("k", "5550000001"));
    assert!(matches!(outcome, RecordOutcome::Sighted { .. }), "{outcome:?}");
    let summary = recon.finish();

    assert_eq!(summary.errored, 0);
    assert_eq!(db.totals().unwrap(), (1, 1));
}
