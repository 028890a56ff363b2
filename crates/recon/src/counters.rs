use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::{CounterDelta, SourceCounters, SourceId};
use crate::store::LeadStore;

/// When accumulated counter deltas are written to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// Write after every applied record.
    PerRecord,
    /// Accumulate in memory and write once when the run finishes.
    #[default]
    EndOfRun,
}

/// Apply `delta` to a source's counters.
///
/// A zero delta is a no-op and issues no write; the result is then `None`.
pub fn apply_delta<S: LeadStore + ?Sized>(
    store: &S,
    source_id: SourceId,
    delta: CounterDelta,
) -> Result<Option<SourceCounters>, StoreError> {
    if delta.is_zero() {
        return Ok(None);
    }
    store.increment_counters(source_id, delta).map(Some)
}

/// Accumulates counter deltas for one run and flushes them per policy.
///
/// `pending` is what has not reached the store yet. A failed per-record
/// flush leaves its delta pending so the end-of-run flush retries it.
#[derive(Debug)]
pub struct CounterAggregator {
    source_id: SourceId,
    policy: FlushPolicy,
    pending: CounterDelta,
    applied: CounterDelta,
}

impl CounterAggregator {
    pub fn new(source_id: SourceId, policy: FlushPolicy) -> Self {
        Self {
            source_id,
            policy,
            pending: CounterDelta::default(),
            applied: CounterDelta::default(),
        }
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    /// Sum of every applied transition recorded so far, flushed or not.
    pub fn applied(&self) -> CounterDelta {
        self.applied
    }

    pub fn pending(&self) -> CounterDelta {
        self.pending
    }

    /// Fold one applied record into the totals.
    pub fn record<S: LeadStore + ?Sized>(&mut self, store: &S, is_today: bool) {
        let one = CounterDelta::one(is_today);
        self.pending.merge(one);
        self.applied.merge(one);

        if self.policy == FlushPolicy::PerRecord {
            if let Err(e) = self.flush(store) {
                warn!(
                    source_id = self.source_id,
                    pending_total = self.pending.total,
                    "per-record counter update failed, retrying at end of run: {e}"
                );
            }
        }
    }

    /// Write everything pending. On failure the pending delta is kept.
    pub fn flush<S: LeadStore + ?Sized>(&mut self, store: &S) -> Result<(), StoreError> {
        match apply_delta(store, self.source_id, self.pending)? {
            Some(now) => {
                debug!(
                    source_id = self.source_id,
                    added_total = self.pending.total,
                    added_today = self.pending.today,
                    total = now.total,
                    today = now.today,
                    "source counters updated"
                );
                self.pending = CounterDelta::default();
            }
            None => debug!(source_id = self.source_id, "no counter change to flush"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, StoreOp};
    use crate::model::SourceKey;

    fn setup() -> (MemoryStore, SourceId) {
        let store = MemoryStore::new();
        let id = store
            .insert_source(&SourceKey::new("Knowlarity", "knowlarity_call"))
            .unwrap()
            .id;
        (store, id)
    }

    #[test]
    fn zero_delta_issues_no_write() {
        let (store, id) = setup();
        assert_eq!(apply_delta(&store, id, CounterDelta::default()).unwrap(), None);
        let mut agg = CounterAggregator::new(id, FlushPolicy::EndOfRun);
        agg.flush(&store).unwrap();
        assert_eq!(store.counter_writes(), 0);
    }

    #[test]
    fn end_of_run_writes_once() {
        let (store, id) = setup();
        let mut agg = CounterAggregator::new(id, FlushPolicy::EndOfRun);
        agg.record(&store, true);
        agg.record(&store, false);
        agg.record(&store, true);
        assert_eq!(store.counter_writes(), 0);

        agg.flush(&store).unwrap();
        assert_eq!(store.counter_writes(), 1);
        assert_eq!(
            store.read_counters(id).unwrap(),
            SourceCounters { total: 3, today: 2 }
        );
        assert!(agg.pending().is_zero());
        assert_eq!(agg.applied(), CounterDelta { total: 3, today: 2 });
    }

    #[test]
    fn per_record_writes_each_time() {
        let (store, id) = setup();
        let mut agg = CounterAggregator::new(id, FlushPolicy::PerRecord);
        agg.record(&store, false);
        agg.record(&store, true);
        assert_eq!(store.counter_writes(), 2);
        agg.flush(&store).unwrap();
        assert_eq!(store.counter_writes(), 2);
        assert_eq!(
            store.read_counters(id).unwrap(),
            SourceCounters { total: 2, today: 1 }
        );
    }

    #[test]
    fn failed_per_record_flush_is_carried() {
        let (store, id) = setup();
        let mut agg = CounterAggregator::new(id, FlushPolicy::PerRecord);
        store.fail_next(StoreOp::ReadCounters, StoreError::Unavailable("blip".into()));
        agg.record(&store, true);
        assert_eq!(agg.pending(), CounterDelta { total: 1, today: 1 });

        agg.record(&store, false);
        assert!(agg.pending().is_zero());
        assert_eq!(
            store.read_counters(id).unwrap(),
            SourceCounters { total: 2, today: 1 }
        );
    }

    #[test]
    fn failed_final_flush_keeps_pending() {
        let (store, id) = setup();
        let mut agg = CounterAggregator::new(id, FlushPolicy::EndOfRun);
        agg.record(&store, false);
        store.fail_next(StoreOp::WriteCounters, StoreError::Unavailable("down".into()));
        assert!(agg.flush(&store).is_err());
        assert_eq!(agg.pending().total, 1);
        assert_eq!(store.read_counters(id).unwrap(), SourceCounters::default());
    }
}
