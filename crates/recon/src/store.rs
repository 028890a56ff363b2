use crate::error::StoreError;
use crate::model::{
    CounterDelta, LeadId, LeadMatch, NewLead, NewSighting, SightingId, SourceCounters,
    SourceDescriptor, SourceId, SourceKey,
};
use crate::phone::PhoneKey;

/// Record-store collaborator the engine reconciles against.
///
/// Every operation distinguishes failure (`Err`) from "zero rows found"
/// (`Ok(None)` / empty `Vec`). Implementations are driven from a single
/// sequential run, so methods take `&self`.
pub trait LeadStore {
    /// Point lookup of a source by (display name, source type).
    fn find_source(&self, key: &SourceKey) -> Result<Option<SourceDescriptor>, StoreError>;

    /// Insert a source row with both counters at zero.
    ///
    /// Returns [`StoreError::Conflict`] if the pair already exists.
    fn insert_source(&self, key: &SourceKey) -> Result<SourceDescriptor, StoreError>;

    fn list_sources(&self) -> Result<Vec<SourceDescriptor>, StoreError>;

    /// Every canonical lead sharing the identity key, in store order. No limit.
    fn leads_by_phone(&self, phone: &PhoneKey) -> Result<Vec<LeadMatch>, StoreError>;

    /// Returns [`StoreError::Conflict`] when the store enforces one lead per
    /// identity key and one already exists.
    fn insert_lead(&self, lead: &NewLead) -> Result<LeadId, StoreError>;

    fn insert_sighting(&self, sighting: &NewSighting) -> Result<SightingId, StoreError>;

    fn read_counters(&self, source_id: SourceId) -> Result<SourceCounters, StoreError>;

    fn write_counters(
        &self,
        source_id: SourceId,
        counters: SourceCounters,
    ) -> Result<(), StoreError>;

    /// Add `delta` to a source's counters and return the new values.
    ///
    /// The default is a read-modify-write and is not atomic against
    /// concurrent writers to the same row. Stores with an atomic increment
    /// should override it.
    fn increment_counters(
        &self,
        source_id: SourceId,
        delta: CounterDelta,
    ) -> Result<SourceCounters, StoreError> {
        let updated = self.read_counters(source_id)?.add(delta);
        self.write_counters(source_id, updated)?;
        Ok(updated)
    }
}

impl<S: LeadStore + ?Sized> LeadStore for &S {
    fn find_source(&self, key: &SourceKey) -> Result<Option<SourceDescriptor>, StoreError> {
        (**self).find_source(key)
    }

    fn insert_source(&self, key: &SourceKey) -> Result<SourceDescriptor, StoreError> {
        (**self).insert_source(key)
    }

    fn list_sources(&self) -> Result<Vec<SourceDescriptor>, StoreError> {
        (**self).list_sources()
    }

    fn leads_by_phone(&self, phone: &PhoneKey) -> Result<Vec<LeadMatch>, StoreError> {
        (**self).leads_by_phone(phone)
    }

    fn insert_lead(&self, lead: &NewLead) -> Result<LeadId, StoreError> {
        (**self).insert_lead(lead)
    }

    fn insert_sighting(&self, sighting: &NewSighting) -> Result<SightingId, StoreError> {
        (**self).insert_sighting(sighting)
    }

    fn read_counters(&self, source_id: SourceId) -> Result<SourceCounters, StoreError> {
        (**self).read_counters(source_id)
    }

    fn write_counters(
        &self,
        source_id: SourceId,
        counters: SourceCounters,
    ) -> Result<(), StoreError> {
        (**self).write_counters(source_id, counters)
    }

    fn increment_counters(
        &self,
        source_id: SourceId,
        delta: CounterDelta,
    ) -> Result<SourceCounters, StoreError> {
        (**self).increment_counters(source_id, delta)
    }
}
