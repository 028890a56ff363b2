use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{parse_timestamp, LeadId, LeadMatch, SourceId};
use crate::phone::PhoneKey;
use crate::store::LeadStore;

/// Which of the three dedup cases an identity key falls into for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No canonical lead carries this key yet.
    New,
    /// Another source owns the key; the sighting is attributed to `lead_id`.
    CrossSource { lead_id: LeadId },
    /// Every existing lead for the key belongs to the calling source.
    SameSource,
}

/// Classify `phone` as seen by `own_source` against the canonical registry.
///
/// A store failure is returned as-is; the orchestrator records it against
/// the record and moves on.
pub fn classify<S: LeadStore + ?Sized>(
    store: &S,
    phone: &PhoneKey,
    own_source: SourceId,
) -> Result<Classification, StoreError> {
    let matches = store.leads_by_phone(phone)?;
    Ok(classify_matches(&matches, own_source))
}

/// Pure half of [`classify`], over an already-fetched match set.
///
/// Foreign rows win over same-source rows. Among foreign rows the most
/// recently created one is chosen; a missing or unparseable timestamp sorts
/// before every valid one, and ties keep the first row in input order.
pub fn classify_matches(matches: &[LeadMatch], own_source: SourceId) -> Classification {
    if matches.is_empty() {
        return Classification::New;
    }

    let mut chosen: Option<(LeadId, Option<DateTime<Utc>>)> = None;
    for m in matches.iter().filter(|m| m.source_id != own_source) {
        let created = m.created_at.as_deref().and_then(parse_timestamp);
        match chosen {
            // Option orders None below Some, which is the tie-break we want.
            Some((_, best)) if created <= best => {}
            _ => chosen = Some((m.id, created)),
        }
    }

    match chosen {
        Some((lead_id, _)) => Classification::CrossSource { lead_id },
        None => Classification::SameSource,
    }
}
