use std::collections::VecDeque;

use crate::error::FeedError;
use crate::model::RawLead;

/// One page of raw records from an ingestion feed.
#[derive(Debug, Clone, Default)]
pub struct LeadPage {
    pub records: Vec<RawLead>,
    /// Provider position of the first record on this page.
    pub offset: u64,
    /// Declared total across all pages, when the provider reports one.
    pub total_count: Option<u64>,
    /// Continuation signal (next cursor / next URL present).
    pub has_more: bool,
}

impl LeadPage {
    /// Whether the walk stops after this page: no records, no continuation,
    /// or the declared total reached, whichever comes first.
    pub fn is_last(&self) -> bool {
        if self.records.is_empty() || !self.has_more {
            return true;
        }
        match self.total_count {
            Some(total) => self.offset + self.records.len() as u64 >= total,
            None => false,
        }
    }
}

/// Source-specific transport: a lazy, sequential stream of lead pages.
///
/// The engine calls [`LeadFeed::next_page`] until a page reports itself as
/// last or the feed fails. Implementations own their cursor state.
pub trait LeadFeed {
    /// Human label used in logs and page-level errors (`form=123`).
    fn label(&self) -> String;

    fn next_page(&mut self) -> Result<LeadPage, FeedError>;
}

/// Feed over pre-built pages. Used by tests and by replays of captured
/// provider output.
pub struct PagedFeed {
    label: String,
    pages: VecDeque<Result<LeadPage, FeedError>>,
}

impl PagedFeed {
    pub fn new(label: impl Into<String>, pages: Vec<Result<LeadPage, FeedError>>) -> Self {
        Self {
            label: label.into(),
            pages: pages.into(),
        }
    }

    /// A single page holding every record, with no continuation.
    pub fn single(label: impl Into<String>, records: Vec<RawLead>) -> Self {
        Self::new(
            label,
            vec![Ok(LeadPage {
                records,
                offset: 0,
                total_count: None,
                has_more: false,
            })],
        )
    }

    pub fn remaining(&self) -> usize {
        self.pages.len()
    }
}

impl LeadFeed for PagedFeed {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn next_page(&mut self) -> Result<LeadPage, FeedError> {
        self.pages.pop_front().unwrap_or_else(|| Ok(LeadPage::default()))
    }
}
