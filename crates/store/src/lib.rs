//! `leadsync-store`: SQLite implementation of [`leadsync_recon::LeadStore`].
//!
//! One database file holds the source registry, canonical leads and
//! cross-source sightings. The schema enforces one lead per identity key, so
//! a racing insert surfaces as [`leadsync_recon::StoreError::Conflict`] and
//! the engine falls back to the sighting path.

mod sqlite;

pub use sqlite::{SqliteStore, StoredLead, StoredSighting, SCHEMA_VERSION};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot create database directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}
