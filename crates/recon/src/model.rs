use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

pub type SourceId = i64;
pub type LeadId = i64;
pub type SightingId = i64;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Identity of a lead source: unique by (display name, source type).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub display_name: String,
    pub source_type: String,
}

impl SourceKey {
    pub fn new(display_name: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            source_type: source_type.into(),
        }
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.display_name, self.source_type)
    }
}

/// Running totals kept on a source row. Only ever incremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCounters {
    pub total: u64,
    pub today: u64,
}

impl SourceCounters {
    pub fn add(self, delta: CounterDelta) -> Self {
        Self {
            total: self.total + delta.total,
            today: self.today + delta.today,
        }
    }
}

/// Increment to apply to a source's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterDelta {
    pub total: u64,
    pub today: u64,
}

impl CounterDelta {
    /// Delta contributed by one applied record.
    pub fn one(is_today: bool) -> Self {
        Self {
            total: 1,
            today: u64::from(is_today),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.total == 0 && self.today == 0
    }

    pub fn merge(&mut self, other: CounterDelta) {
        self.total += other.total;
        self.today += other.today;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    pub id: SourceId,
    pub display_name: String,
    pub source_type: String,
    pub counters: SourceCounters,
}

// ---------------------------------------------------------------------------
// Incoming records
// ---------------------------------------------------------------------------

/// One lead record as delivered by an ingestion feed, after provider field
/// extraction but before any reconciliation.
#[derive(Debug, Clone)]
pub struct RawLead {
    /// Provider-assigned id (Knowlarity `uuid`, Meta lead `id`).
    pub external_id: Option<String>,
    /// Creation time in the provider's own offset; its calendar date decides
    /// the `today` counter.
    pub created_at: Option<DateTime<FixedOffset>>,
    /// Raw phone-like field, unnormalized.
    pub phone: Option<String>,
    pub name: Option<String>,
    /// Provider payload, stored verbatim on whatever row the record produces.
    pub payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Canonical registry rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LeadStatus {
    New,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
        }
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Existing canonical lead sharing an identity key, as the classifier sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadMatch {
    pub id: LeadId,
    pub source_id: SourceId,
    /// Creation timestamp exactly as stored; may be missing or unparseable.
    pub created_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewLead {
    pub full_name: String,
    pub phone_normalized: String,
    pub source_id: SourceId,
    pub external_id: Option<String>,
    pub status: LeadStatus,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewSighting {
    pub lead_id: LeadId,
    pub source_id: SourceId,
    pub external_id: Option<String>,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    /// Always false: this engine never records primary sightings.
    pub is_primary: bool,
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingOrInvalidPhone,
    BeforeWindow,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipDetail {
    pub external_id: Option<String>,
    pub reason: SkipReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    /// A single record ended `Errored`.
    Record,
    /// The feed failed mid-pagination; the stream stopped early.
    Page,
    /// Counter sync failed; leads and sightings already written stand.
    Counters,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    pub scope: ErrorScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub message: String,
}

/// Outcome of one pipeline invocation. Not persisted.
///
/// Every processed record lands in exactly one tally, so
/// `processed == tally_total()` always holds.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub source_id: Option<SourceId>,
    pub pages_fetched: usize,
    pub processed: usize,
    pub inserted_new: usize,
    pub cross_source: usize,
    pub duplicate_same_source: usize,
    pub skipped_no_identity: usize,
    pub skipped_stale: usize,
    pub errored: usize,
    /// Sum of all applied transitions; what the counters owe for this run.
    pub counter_delta: CounterDelta,
    pub counters_synced: bool,
    pub details: Vec<SkipDetail>,
    pub errors: Vec<RunError>,
}

impl RunSummary {
    pub fn tally_total(&self) -> usize {
        self.inserted_new
            + self.cross_source
            + self.duplicate_same_source
            + self.skipped_no_identity
            + self.skipped_stale
            + self.errored
    }

    pub fn applied(&self) -> usize {
        self.inserted_new + self.cross_source
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Parse a provider timestamp, keeping the offset it was written in.
///
/// Accepts RFC 3339 (`Z` or numeric offset), offsets without a colon
/// (`+0000`, as Meta sends them), and naive `YYYY-MM-DD[T ]HH:MM:SS[.f]`
/// which is taken as UTC. Anything else is `None`.
pub fn parse_provider_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc().into());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().into())
}

/// Parse a provider or store timestamp as a UTC instant.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    parse_provider_timestamp(raw).map(|dt| dt.with_timezone(&Utc))
}
