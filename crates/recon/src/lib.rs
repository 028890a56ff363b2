//! `leadsync-recon`: Phone-keyed multi-source lead reconciliation engine.
//!
//! Pure engine crate: pulls raw lead pages from a [`LeadFeed`], decides per
//! record whether to create a canonical lead, record a cross-source sighting
//! or drop a same-source repeat, and keeps the per-source counters in step.
//! No HTTP or SQL dependencies; the record store is reached through
//! [`LeadStore`].

pub mod classify;
pub mod counters;
pub mod engine;
pub mod error;
pub mod feed;
pub mod memory;
pub mod model;
pub mod phone;
pub mod registry;
pub mod store;

pub use classify::{classify, Classification};
pub use counters::{CounterAggregator, FlushPolicy};
pub use engine::{run, Reconciler, RecordOutcome, RunOptions};
pub use error::{FeedError, ReconError, StoreError};
pub use feed::{LeadFeed, LeadPage};
pub use memory::MemoryStore;
pub use model::{RawLead, RunSummary, SourceDescriptor, SourceKey};
pub use phone::{normalize_phone, PhoneKey};
pub use registry::ensure_source;
pub use store::LeadStore;
