use tracing::{debug, info, warn};

use crate::error::{ReconError, StoreError};
use crate::model::{SourceDescriptor, SourceKey};
use crate::store::LeadStore;

/// Look up the source row for `key`, creating it with zeroed counters on
/// first use.
///
/// Idempotent: an existing row is returned verbatim. If a concurrent first
/// insert wins the race, the store reports a conflict and the winner's row
/// is re-read. Any other store failure aborts the calling run.
pub fn ensure_source<S: LeadStore + ?Sized>(
    store: &S,
    key: &SourceKey,
) -> Result<SourceDescriptor, ReconError> {
    let registry_err = |cause: StoreError| ReconError::SourceRegistry {
        display_name: key.display_name.clone(),
        source_type: key.source_type.clone(),
        cause,
    };

    if let Some(existing) = store.find_source(key).map_err(registry_err)? {
        debug!(
            source_id = existing.id,
            total = existing.counters.total,
            today = existing.counters.today,
            "found source row for {key}"
        );
        return Ok(existing);
    }

    info!("source row for {key} not found, inserting");
    match store.insert_source(key) {
        Ok(created) => {
            info!(source_id = created.id, "inserted source row for {key}");
            Ok(created)
        }
        Err(StoreError::Conflict(msg)) => {
            warn!("source insert for {key} raced another writer ({msg}); re-reading");
            store
                .find_source(key)
                .map_err(registry_err)?
                .ok_or_else(|| {
                    registry_err(StoreError::NotFound(format!(
                        "source {key} vanished after insert conflict"
                    )))
                })
        }
        Err(e) => Err(registry_err(e)),
    }
}
