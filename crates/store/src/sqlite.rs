use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::{debug, info};

use leadsync_recon::model::{
    CounterDelta, LeadId, LeadMatch, NewLead, NewSighting, SightingId, SourceCounters,
    SourceDescriptor, SourceId, SourceKey,
};
use leadsync_recon::{LeadStore, PhoneKey, StoreError};

use crate::StorageError;

pub const SCHEMA_VERSION: i64 = 2;

const SOURCE_COLUMNS: &str = "id, display_name, source_type, total_leads, todays_leads";

/// Canonical lead row as stored, for inspection and tests.
#[derive(Debug, Clone, PartialEq)]
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

#[derive(Debug, Clone, PartialEq)]
pub struct StoredSighting {
    pub id: SightingId,
    pub lead_id: LeadId,
    pub source_id: SourceId,
    pub external_id: Option<String>,
    pub payload: serde_json::Value,
    pub received_at: String,
    pub is_primary: bool,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and bring its schema
    /// up to date. Missing parent directories are created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        debug!(path = %path.display(), "opening lead database");
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let mut current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        if current < 1 {
            self.apply_migration(1, include_str!("../migrations/0001_lead_registry.sql"))?;
            current = 1;
        }

        if current < 2 {
            self.apply_migration(2, include_str!("../migrations/0002_unique_phone.sql"))?;
        }

        Ok(())
    }

    /// Run one migration step and bump `user_version` atomically; a failed
    /// step leaves the previous schema untouched.
    fn apply_migration(&self, version: i64, sql: &str) -> Result<(), StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        info!("lead database migrated to schema {version}");
        Ok(())
    }

    pub fn lead(&self, id: LeadId) -> Result<Option<StoredLead>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, full_name, phone_normalized, source_id, external_id, status,
                        created_at, raw_payload
                 FROM leads WHERE id = ?1",
                params![id],
                |row| {
                    Ok(StoredLead {
                        id: row.get(0)?,
                        full_name: row.get(1)?,
                        phone_normalized: row.get(2)?,
                        source_id: row.get(3)?,
                        external_id: row.get(4)?,
                        status: row.get(5)?,
                        created_at: row.get(6)?,
                        payload: json_column(row, 7)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn sightings_for_lead(&self, lead_id: LeadId) -> Result<Vec<StoredSighting>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, lead_id, source_id, external_id, raw_payload, received_at, is_primary
             FROM lead_sightings WHERE lead_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![lead_id], |row| {
            Ok(StoredSighting {
                id: row.get(0)?,
                lead_id: row.get(1)?,
                source_id: row.get(2)?,
                external_id: row.get(3)?,
                payload: json_column(row, 4)?,
                received_at: row.get(5)?,
                is_primary: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Row counts of (leads, sightings).
    pub fn totals(&self) -> Result<(u64, u64), StorageError> {
        let leads: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM leads", [], |row| row.get(0))?;
        let sightings: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM lead_sightings", [], |row| row.get(0))?;
        Ok((leads.max(0) as u64, sightings.max(0) as u64))
    }

    /// Raw connection, for callers that need ad-hoc queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

// ---------------------------------------------------------------------------
// LeadStore
// ---------------------------------------------------------------------------

impl LeadStore for SqliteStore {
    fn find_source(&self, key: &SourceKey) -> Result<Option<SourceDescriptor>, StoreError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {SOURCE_COLUMNS} FROM sources
                     WHERE display_name = ?1 AND source_type = ?2"
                ),
                params![key.display_name, key.source_type],
                source_row,
            )
            .optional()
            .map_err(store_err)
    }

    fn insert_source(&self, key: &SourceKey) -> Result<SourceDescriptor, StoreError> {
        self.conn
            .query_row(
                &format!(
                    "INSERT INTO sources (display_name, source_type, total_leads, todays_leads, created_at)
                     VALUES (?1, ?2, 0, 0, ?3)
                     RETURNING {SOURCE_COLUMNS}"
                ),
                params![key.display_name, key.source_type, now()],
                source_row,
            )
            .map_err(store_err)
    }

    fn list_sources(&self) -> Result<Vec<SourceDescriptor>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {SOURCE_COLUMNS} FROM sources ORDER BY id"))
            .map_err(store_err)?;
        let rows = stmt.query_map([], source_row).map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    fn leads_by_phone(&self, phone: &PhoneKey) -> Result<Vec<LeadMatch>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT id, source_id, created_at FROM leads
                 WHERE phone_normalized = ?1 ORDER BY id",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![phone.as_str()], |row| {
                Ok(LeadMatch {
                    id: row.get(0)?,
                    source_id: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })
            .map_err(store_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
    }

    fn insert_lead(&self, lead: &NewLead) -> Result<LeadId, StoreError> {
        let payload = serde_json::to_string(&lead.payload)
            .map_err(|e| StoreError::Corrupt(format!("lead payload: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO leads (full_name, phone_normalized, source_id, external_id,
                                    status, created_at, raw_payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    lead.full_name,
                    lead.phone_normalized,
                    lead.source_id,
                    lead.external_id,
                    lead.status.as_str(),
                    now(),
                    payload,
                ],
            )
            .map_err(store_err)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_sighting(&self, sighting: &NewSighting) -> Result<SightingId, StoreError> {
        let payload = serde_json::to_string(&sighting.payload)
            .map_err(|e| StoreError::Corrupt(format!("sighting payload: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO lead_sightings (lead_id, source_id, external_id, raw_payload,
                                             received_at, is_primary)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    sighting.lead_id,
                    sighting.source_id,
                    sighting.external_id,
                    payload,
                    sighting
                        .received_at
                        .to_rfc3339_opts(SecondsFormat::Millis, true),
                    sighting.is_primary,
                ],
            )
            .map_err(store_err)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn read_counters(&self, source_id: SourceId) -> Result<SourceCounters, StoreError> {
        self.conn
            .query_row(
                "SELECT total_leads, todays_leads FROM sources WHERE id = ?1",
                params![source_id],
                counters_row,
            )
            .optional()
            .map_err(store_err)?
            .ok_or_else(|| StoreError::NotFound(format!("source {source_id}")))
    }

    fn write_counters(
        &self,
        source_id: SourceId,
        counters: SourceCounters,
    ) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE sources SET total_leads = ?2, todays_leads = ?3 WHERE id = ?1",
                params![source_id, to_sql_count(counters.total)?, to_sql_count(counters.today)?],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("source {source_id}")));
        }
        Ok(())
    }

    /// Single-statement increment; concurrent runs cannot lose updates.
    fn increment_counters(
        &self,
        source_id: SourceId,
        delta: CounterDelta,
    ) -> Result<SourceCounters, StoreError> {
        self.conn
            .query_row(
                "UPDATE sources
                 SET total_leads = total_leads + ?2, todays_leads = todays_leads + ?3
                 WHERE id = ?1
                 RETURNING total_leads, todays_leads",
                params![source_id, to_sql_count(delta.total)?, to_sql_count(delta.today)?],
                counters_row,
            )
            .optional()
            .map_err(store_err)?
            .ok_or_else(|| StoreError::NotFound(format!("source {source_id}")))
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn source_row(row: &Row<'_>) -> rusqlite::Result<SourceDescriptor> {
    Ok(SourceDescriptor {
        id: row.get(0)?,
        display_name: row.get(1)?,
        source_type: row.get(2)?,
        counters: SourceCounters {
            total: count_column(row, 3)?,
            today: count_column(row, 4)?,
        },
    })
}

fn counters_row(row: &Row<'_>) -> rusqlite::Result<SourceCounters> {
    Ok(SourceCounters {
        total: count_column(row, 0)?,
        today: count_column(row, 1)?,
    })
}

fn count_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Integer, Box::new(e))
    })
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn to_sql_count(n: u64) -> Result<i64, StoreError> {
    i64::try_from(n).map_err(|_| StoreError::Corrupt(format!("counter value {n} out of range")))
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Map a rusqlite failure onto the engine's store taxonomy.
fn store_err(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict(e.to_string())
        }
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => StoreError::Corrupt(e.to_string()),
        _ => StoreError::Unavailable(e.to_string()),
    }
}
