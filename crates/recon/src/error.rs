use thiserror::Error;

/// Failure reported by a record store.
///
/// Always distinct from "zero rows found", which stores report as an empty
/// `Vec` or `None`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Connectivity failure or a rejected query.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A uniqueness constraint rejected the write.
    #[error("uniqueness conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// A row came back in a shape the engine cannot use.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Upstream fetch failure raised by a [`crate::LeadFeed`] mid-pagination.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FeedError {
    /// Where in the stream the failure happened (`offset=200`, `form=123`).
    pub context: Option<String>,
    pub message: String,
}

impl FeedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            context: None,
            message: message.into(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Run-level failure. Everything else is accumulated into the summary.
#[derive(Debug, Error)]
pub enum ReconError {
    /// The source row could not be read or created, so no record can be
    /// attributed.
    #[error("cannot resolve source '{display_name}' ({source_type}): {cause}")]
    SourceRegistry {
        display_name: String,
        source_type: String,
        #[source]
        cause: StoreError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_error_names_the_source() {
        let err = ReconError::SourceRegistry {
            display_name: "Meta".into(),
            source_type: "meta_form".into(),
            cause: StoreError::Unavailable("connection refused".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("'Meta' (meta_form)"), "{msg}");
        assert!(msg.contains("connection refused"), "{msg}");
    }

    #[test]
    fn feed_error_context_is_optional() {
        let err = FeedError::new("HTTP 502").with_context("offset=200");
        assert_eq!(err.to_string(), "HTTP 502");
        assert_eq!(err.context.as_deref(), Some("offset=200"));
    }
}
