use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, error, info, warn};

use crate::classify::{classify, Classification};
use crate::counters::{CounterAggregator, FlushPolicy};
use crate::error::{FeedError, ReconError, StoreError};
use crate::feed::LeadFeed;
use crate::model::{
    ErrorScope, LeadId, LeadStatus, NewLead, NewSighting, RawLead, RunError, RunSummary,
    SightingId, SkipDetail, SkipReason, SourceDescriptor, SourceKey,
};
use crate::phone::{normalize_phone, PhoneKey};
use crate::registry::ensure_source;
use crate::store::LeadStore;

/// Per-run knobs.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Reference date for the `today` counter. A record counts toward it when
    /// its own creation date (UTC) equals this.
    pub today: NaiveDate,
    /// Records created strictly before this instant are skipped as stale.
    pub not_before: Option<DateTime<Utc>>,
    pub flush: FlushPolicy,
}

impl RunOptions {
    /// Options anchored at the current UTC date.
    pub fn now(flush: FlushPolicy) -> Self {
        Self {
            today: Utc::now().date_naive(),
            not_before: None,
            flush,
        }
    }

    pub fn with_not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }
}

/// Terminal state of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Created(LeadId),
    Sighted {
        lead_id: LeadId,
        sighting_id: SightingId,
    },
    SameSource,
    SkippedNoIdentity,
    SkippedStale,
    Errored(String),
}

impl RecordOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Created(_) | Self::Sighted { .. })
    }
}

/// Drives records for one source through normalize, classify, apply and
/// count, folding every outcome into a [`RunSummary`].
pub struct Reconciler<'s, S: LeadStore + ?Sized> {
    store: &'s S,
    source: SourceDescriptor,
    options: RunOptions,
    counters: CounterAggregator,
    summary: RunSummary,
}

impl<'s, S: LeadStore + ?Sized> Reconciler<'s, S> {
    /// Resolve the source row and start a run. The only fallible step: a
    /// source that cannot be read or created aborts before any record.
    pub fn begin(store: &'s S, key: &SourceKey, options: RunOptions) -> Result<Self, ReconError> {
        let source = ensure_source(store, key)?;
        info!(
            source_id = source.id,
            today = %options.today,
            flush = ?options.flush,
            "starting run for {key}"
        );
        let summary = RunSummary {
            source_id: Some(source.id),
            counters_synced: true,
            ..RunSummary::default()
        };
        Ok(Self {
            store,
            counters: CounterAggregator::new(source.id, options.flush),
            source,
            options,
            summary,
        })
    }

    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Record an upstream failure that happened outside a feed walk, such as
    /// resolving which streams to read. `label` names the failed request.
    pub fn record_page_error(&mut self, label: &str, e: FeedError) {
        let context = match e.context {
            Some(ref ctx) => format!("{label} {ctx}"),
            None => label.to_string(),
        };
        error!(source_id = self.source.id, %context, "page fetch failed: {e}");
        self.summary.errors.push(RunError {
            scope: ErrorScope::Page,
            external_id: None,
            context: Some(context),
            message: e.message,
        });
    }

    /// Walk every page of `feed`, processing records in delivery order.
    ///
    /// A feed failure stops this feed only; it is recorded as a page-level
    /// error and work already applied stands.
    pub fn ingest(&mut self, feed: &mut dyn LeadFeed) {
        let label = feed.label();
        loop {
            let page = match feed.next_page() {
                Ok(page) => page,
                Err(e) => {
                    self.record_page_error(&label, e);
                    break;
                }
            };

            self.summary.pages_fetched += 1;
            let last = page.is_last();
            debug!(
                feed = %label,
                offset = page.offset,
                records = page.records.len(),
                total = ?page.total_count,
                "fetched page"
            );
            if page.records.is_empty() {
                break;
            }
            for record in page.records {
                self.process_record(record);
            }
            if last {
                break;
            }
        }
    }

    /// Take one record to a terminal state and tally it.
    pub fn process_record(&mut self, record: RawLead) -> RecordOutcome {
        self.summary.processed += 1;
        let outcome = self.reconcile(&record);

        match &outcome {
            RecordOutcome::Created(_) => self.summary.inserted_new += 1,
            RecordOutcome::Sighted { .. } => self.summary.cross_source += 1,
            RecordOutcome::SameSource => self.summary.duplicate_same_source += 1,
            RecordOutcome::SkippedNoIdentity => {
                self.summary.skipped_no_identity += 1;
                self.summary.details.push(SkipDetail {
                    external_id: record.external_id.clone(),
                    reason: SkipReason::MissingOrInvalidPhone,
                    raw_phone: record.phone.clone(),
                });
            }
            RecordOutcome::SkippedStale => {
                self.summary.skipped_stale += 1;
                self.summary.details.push(SkipDetail {
                    external_id: record.external_id.clone(),
                    reason: SkipReason::BeforeWindow,
                    raw_phone: None,
                });
            }
            RecordOutcome::Errored(msg) => {
                self.summary.errored += 1;
                self.summary.errors.push(RunError {
                    scope: ErrorScope::Record,
                    external_id: record.external_id.clone(),
                    context: None,
                    message: msg.clone(),
                });
            }
        }

        if outcome.is_applied() {
            // The record's own calendar date, not its UTC date.
            let is_today = record
                .created_at
                .is_some_and(|t| t.date_naive() == self.options.today);
            self.counters.record(self.store, is_today);
        }
        outcome
    }

    fn reconcile(&self, record: &RawLead) -> RecordOutcome {
        let ext = record.external_id.as_deref().unwrap_or("-");

        if let (Some(floor), Some(created)) = (self.options.not_before, record.created_at) {
            if created.with_timezone(&Utc) < floor {
                debug!(external_id = ext, %created, "record predates window, skipping");
                return RecordOutcome::SkippedStale;
            }
        }

        let Some(phone) = normalize_phone(record.phone.as_deref()) else {
            debug!(external_id = ext, raw_phone = ?record.phone, "no usable phone, skipping");
            return RecordOutcome::SkippedNoIdentity;
        };

        match classify(self.store, &phone, self.source.id) {
            Ok(Classification::New) => self.create_lead(record, &phone, ext),
            Ok(other) => self.apply_existing(other, record, &phone, ext),
            Err(e) => {
                warn!(external_id = ext, %phone, "lead lookup failed: {e}");
                RecordOutcome::Errored(format!("lead lookup failed: {e}"))
            }
        }
    }

    fn create_lead(&self, record: &RawLead, phone: &PhoneKey, ext: &str) -> RecordOutcome {
        let full_name = record
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} Lead {phone}", self.source.display_name));

        let lead = NewLead {
            full_name,
            phone_normalized: phone.as_str().to_string(),
            source_id: self.source.id,
            external_id: record.external_id.clone(),
            status: LeadStatus::New,
            payload: record.payload.clone(),
        };

        match self.store.insert_lead(&lead) {
            Ok(lead_id) => {
                info!(external_id = ext, %phone, lead_id, "created lead");
                RecordOutcome::Created(lead_id)
            }
            Err(StoreError::Conflict(msg)) => {
                // Another writer claimed the key between lookup and insert.
                info!(external_id = ext, %phone, "lead insert conflicted ({msg}), reclassifying");
                match classify(self.store, phone, self.source.id) {
                    Ok(Classification::New) => RecordOutcome::Errored(format!(
                        "lead insert conflicted but no existing lead found for {phone}"
                    )),
                    Ok(other) => self.apply_existing(other, record, phone, ext),
                    Err(e) => RecordOutcome::Errored(format!("lead lookup failed: {e}")),
                }
            }
            Err(e) => {
                warn!(external_id = ext, %phone, "lead insert failed: {e}");
                RecordOutcome::Errored(format!("lead insert failed: {e}"))
            }
        }
    }

    fn apply_existing(
        &self,
        class: Classification,
        record: &RawLead,
        phone: &PhoneKey,
        ext: &str,
    ) -> RecordOutcome {
        let lead_id = match class {
            Classification::CrossSource { lead_id } => lead_id,
            Classification::SameSource => {
                debug!(external_id = ext, %phone, "same-source duplicate");
                return RecordOutcome::SameSource;
            }
            Classification::New => {
                return RecordOutcome::Errored(format!("no existing lead for {phone}"));
            }
        };

        let sighting = NewSighting {
            lead_id,
            source_id: self.source.id,
            external_id: record.external_id.clone(),
            payload: record.payload.clone(),
            received_at: Utc::now(),
            is_primary: false,
        };
        match self.store.insert_sighting(&sighting) {
            Ok(sighting_id) => {
                info!(external_id = ext, %phone, lead_id, sighting_id, "recorded cross-source sighting");
                RecordOutcome::Sighted {
                    lead_id,
                    sighting_id,
                }
            }
            Err(e) => {
                warn!(external_id = ext, %phone, lead_id, "sighting insert failed: {e}");
                RecordOutcome::Errored(format!("sighting insert failed: {e}"))
            }
        }
    }

    /// Flush outstanding counter deltas and close the run.
    ///
    /// A flush failure is reported in the summary; rows already written are
    /// not undone.
    pub fn finish(mut self) -> RunSummary {
        if let Err(e) = self.counters.flush(self.store) {
            error!(source_id = self.source.id, "counter sync failed: {e}");
            self.summary.counters_synced = false;
            self.summary.errors.push(RunError {
                scope: ErrorScope::Counters,
                external_id: None,
                context: Some(format!(
                    "pending total={} today={}",
                    self.counters.pending().total,
                    self.counters.pending().today
                )),
                message: e.to_string(),
            });
        }
        self.summary.counter_delta = self.counters.applied();

        info!(
            source_id = self.source.id,
            processed = self.summary.processed,
            new = self.summary.inserted_new,
            cross_source = self.summary.cross_source,
            same_source = self.summary.duplicate_same_source,
            skipped = self.summary.skipped_no_identity + self.summary.skipped_stale,
            errored = self.summary.errored,
            "run finished"
        );
        self.summary
    }
}

/// Reconcile every feed for one source, in order, and return the summary.
///
/// Only a source-registry failure is returned as `Err`; everything else,
/// including feeds that fail mid-way, ends up in the summary.
pub fn run<'f, S: LeadStore + ?Sized>(
    store: &S,
    key: &SourceKey,
    feeds: Vec<Box<dyn LeadFeed + 'f>>,
    options: RunOptions,
) -> Result<RunSummary, ReconError> {
    let mut recon = Reconciler::begin(store, key, options)?;
    for mut feed in feeds {
        recon.ingest(feed.as_mut());
    }
    Ok(recon.finish())
}
