//! Lead transports: page-by-page HTTP feeds for the reconciliation engine.

mod common;
pub mod knowlarity;
pub mod meta;

pub(crate) use common::{parse_instant, truncate};
