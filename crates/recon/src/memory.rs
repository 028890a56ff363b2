//! In-memory [`LeadStore`] with fault injection.
//!
//! Behaves like the relational store minus durability: ids are assigned in
//! insertion order and lookups return rows in store order. Faults queued via
//! [`MemoryStore::fail_next`] are consumed one per matching call.

use std::cell::{Cell, RefCell};

use chrono::Utc;

use crate::error::StoreError;
use crate::model::{
    LeadId, LeadMatch, NewLead, NewSighting, SightingId, SourceCounters, SourceDescriptor,
    SourceId, SourceKey,
};
use crate::phone::PhoneKey;
use crate::store::LeadStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    FindSource,
    InsertSource,
    LeadsByPhone,
    InsertLead,
    InsertSighting,
    ReadCounters,
    WriteCounters,
}

#[derive(Debug, Clone)]
pub struct StoredLead {
    pub id: LeadId,
    pub full_name: String,
    pub phone_normalized: String,
    pub source_id: SourceId,
    pub external_id: Option<String>,
    pub status: String,
    pub created_at: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct StoredSighting {
    pub id: SightingId,
    pub lead_id: LeadId,
    pub source_id: SourceId,
    pub external_id: Option<String>,
    pub payload: serde_json::Value,
    pub received_at: String,
    pub is_primary: bool,
}

#[derive(Default)]
struct Tables {
    sources: Vec<SourceDescriptor>,
    leads: Vec<StoredLead>,
    sightings: Vec<StoredSighting>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RefCell<Tables>,
    faults: RefCell<Vec<(StoreOp, StoreError)>>,
    unique_phone: bool,
    miss_lookup: Cell<bool>,
    miss_leads: Cell<bool>,
    counter_writes: Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject a second lead for the same identity key with
    /// [`StoreError::Conflict`], like a unique index would.
    pub fn with_unique_phone() -> Self {
        Self {
            unique_phone: true,
            ..Self::default()
        }
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.faults.borrow_mut().push((op, err));
    }

    /// Make the next `find_source` report no row even if one exists.
    pub fn miss_next_source_lookup(&self) {
        self.miss_lookup.set(true);
    }

    /// Make the next `leads_by_phone` report no rows, as if another writer
    /// inserted right after the lookup.
    pub fn miss_next_lead_lookup(&self) {
        self.miss_leads.set(true);
    }

    /// Insert a lead row directly, bypassing the unique-phone check. Used to
    /// stage pre-existing data, including duplicate rows left by races.
    pub fn seed_lead(
        &self,
        source_id: SourceId,
        phone: &str,
        created_at: Option<&str>,
    ) -> LeadId {
        let mut t = self.tables.borrow_mut();
        let id = t.next_id();
        t.leads.push(StoredLead {
            id,
            full_name: format!("Seeded Lead {phone}"),
            phone_normalized: phone.to_string(),
            source_id,
            external_id: None,
            status: "New".into(),
            created_at: created_at.map(str::to_string),
            payload: serde_json::Value::Null,
        });
        id
    }

    pub fn sources(&self) -> Vec<SourceDescriptor> {
        self.tables.borrow().sources.clone()
    }

    pub fn leads(&self) -> Vec<StoredLead> {
        self.tables.borrow().leads.clone()
    }

    pub fn sightings(&self) -> Vec<StoredSighting> {
        self.tables.borrow().sightings.clone()
    }

    /// Number of successful counter writes, for checking no-op flushes.
    pub fn counter_writes(&self) -> usize {
        self.counter_writes.get()
    }

    fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        let mut faults = self.faults.borrow_mut();
        match faults.iter().position(|(o, _)| *o == op) {
            Some(i) => Err(faults.remove(i).1),
            None => Ok(()),
        }
    }
}

impl LeadStore for MemoryStore {
    fn find_source(&self, key: &SourceKey) -> Result<Option<SourceDescriptor>, StoreError> {
        self.check(StoreOp::FindSource)?;
        if self.miss_lookup.replace(false) {
            return Ok(None);
        }
        Ok(self
            .tables
            .borrow()
            .sources
            .iter()
            .find(|s| s.display_name == key.display_name && s.source_type == key.source_type)
            .cloned())
    }

    fn insert_source(&self, key: &SourceKey) -> Result<SourceDescriptor, StoreError> {
        self.check(StoreOp::InsertSource)?;
        let mut t = self.tables.borrow_mut();
        if t
            .sources
            .iter()
            .any(|s| s.display_name == key.display_name && s.source_type == key.source_type)
        {
            return Err(StoreError::Conflict(format!("source {key} already exists")));
        }
        let id = t.next_id();
        let row = SourceDescriptor {
            id,
            display_name: key.display_name.clone(),
            source_type: key.source_type.clone(),
            counters: SourceCounters::default(),
        };
        t.sources.push(row.clone());
        Ok(row)
    }

    fn list_sources(&self) -> Result<Vec<SourceDescriptor>, StoreError> {
        Ok(self.sources())
    }

    fn leads_by_phone(&self, phone: &PhoneKey) -> Result<Vec<LeadMatch>, StoreError> {
        self.check(StoreOp::LeadsByPhone)?;
        if self.miss_leads.replace(false) {
            return Ok(Vec::new());
        }
        Ok(self
            .tables
            .borrow()
            .leads
            .iter()
            .filter(|l| l.phone_normalized == phone.as_str())
            .map(|l| LeadMatch {
                id: l.id,
                source_id: l.source_id,
                created_at: l.created_at.clone(),
            })
            .collect())
    }

    fn insert_lead(&self, lead: &NewLead) -> Result<LeadId, StoreError> {
        self.check(StoreOp::InsertLead)?;
        let mut t = self.tables.borrow_mut();
        if self.unique_phone
            && t.leads.iter().any(|l| l.phone_normalized == lead.phone_normalized)
        {
            return Err(StoreError::Conflict(format!(
                "lead with phone {} already exists",
                lead.phone_normalized
            )));
        }
        let id = t.next_id();
        t.leads.push(StoredLead {
            id,
            full_name: lead.full_name.clone(),
            phone_normalized: lead.phone_normalized.clone(),
            source_id: lead.source_id,
            external_id: lead.external_id.clone(),
            status: lead.status.as_str().to_string(),
            created_at: Some(Utc::now().to_rfc3339()),
            payload: lead.payload.clone(),
        });
        Ok(id)
    }

    fn insert_sighting(&self, sighting: &NewSighting) -> Result<SightingId, StoreError> {
        self.check(StoreOp::InsertSighting)?;
        let mut t = self.tables.borrow_mut();
        if !t.leads.iter().any(|l| l.id == sighting.lead_id) {
            return Err(StoreError::NotFound(format!("lead {}", sighting.lead_id)));
        }
        let id = t.next_id();
        t.sightings.push(StoredSighting {
            id,
            lead_id: sighting.lead_id,
            source_id: sighting.source_id,
            external_id: sighting.external_id.clone(),
            payload: sighting.payload.clone(),
            received_at: sighting.received_at.to_rfc3339(),
            is_primary: sighting.is_primary,
        });
        Ok(id)
    }

    fn read_counters(&self, source_id: SourceId) -> Result<SourceCounters, StoreError> {
        self.check(StoreOp::ReadCounters)?;
        self.tables
            .borrow()
            .sources
            .iter()
            .find(|s| s.id == source_id)
            .map(|s| s.counters)
            .ok_or_else(|| StoreError::NotFound(format!("source {source_id}")))
    }

    fn write_counters(
        &self,
        source_id: SourceId,
        counters: SourceCounters,
    ) -> Result<(), StoreError> {
        self.check(StoreOp::WriteCounters)?;
        let mut t = self.tables.borrow_mut();
        let row = t
            .sources
            .iter_mut()
            .find(|s| s.id == source_id)
            .ok_or_else(|| StoreError::NotFound(format!("source {source_id}")))?;
        row.counters = counters;
        self.counter_writes.set(self.counter_writes.get() + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CounterDelta, LeadStatus};
    use crate::phone::normalize_phone;

    fn lead(phone: &str, source_id: SourceId) -> NewLead {
        NewLead {
            full_name: "Test".into(),
            phone_normalized: phone.into(),
            source_id,
            external_id: None,
            status: LeadStatus::New,
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn unique_phone_rejects_second_lead() {
        let store = MemoryStore::with_unique_phone();
        store.insert_lead(&lead("5550192345", 1)).unwrap();
        let err = store.insert_lead(&lead("5550192345", 2)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn default_store_tolerates_duplicate_keys() {
        let store = MemoryStore::new();
        store.insert_lead(&lead("5550192345", 1)).unwrap();
        store.insert_lead(&lead("5550192345", 2)).unwrap();
        let key = normalize_phone(Some("5550192345")).unwrap();
        assert_eq!(store.leads_by_phone(&key).unwrap().len(), 2);
    }

    #[test]
    fn faults_are_consumed_once() {
        let store = MemoryStore::new();
        let key = normalize_phone(Some("5550192345")).unwrap();
        store.fail_next(StoreOp::LeadsByPhone, StoreError::Unavailable("down".into()));
        assert!(store.leads_by_phone(&key).is_err());
        assert!(store.leads_by_phone(&key).unwrap().is_empty());
    }

    #[test]
    fn default_increment_is_read_modify_write() {
        let store = MemoryStore::new();
        let src = store.insert_source(&SourceKey::new("Meta", "meta_form")).unwrap();
        let updated = store
            .increment_counters(src.id, CounterDelta { total: 3, today: 1 })
            .unwrap();
        assert_eq!(updated, SourceCounters { total: 3, today: 1 });
        assert_eq!(store.read_counters(src.id).unwrap(), updated);
        assert_eq!(store.counter_writes(), 1);
    }
}
