//! CLI Exit Code Registry
//!
//! This is the single source of truth for all `leadsync` exit codes.
//! Cron jobs and wrappers branch on them, so treat them as a contract.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                               |
//! |---------|------------------|-------------------------------------------|
//! | 0       | Universal        | Success                                   |
//! | 1       | Universal        | General error (unspecified)               |
//! | 2       | Universal        | CLI usage error (bad args, bad timestamp) |
//! | 51-54   | fetch            | Upstream providers (Knowlarity, Meta)     |
//! | 60-69   | sync             | Configuration, record store, partial runs |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure (e.g. stdout closed mid-write).
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unparseable timestamps.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Fetch / adapter (50-59): upstream lead providers
// =============================================================================

/// Auth rejected by upstream (401/403).
pub const EXIT_FETCH_AUTH: u8 = 51;

/// Bad request rejected by upstream (400).
pub const EXIT_FETCH_VALIDATION: u8 = 52;

/// Rate limited after retries (429).
pub const EXIT_FETCH_RATE_LIMIT: u8 = 53;

/// Upstream error (5xx), malformed response, or network failure after retries.
pub const EXIT_FETCH_UPSTREAM: u8 = 54;

// =============================================================================
// Sync (60-69)
// =============================================================================

/// Required configuration missing or invalid. Nothing was fetched.
pub const EXIT_CONFIG: u8 = 60;

/// Record store could not be opened, or the source row could not be
/// resolved. Nothing was reconciled.
pub const EXIT_STORE: u8 = 61;

/// The run completed and printed its summary, but recorded errors
/// (failed records, a failed page, or unsynced counters).
pub const EXIT_PARTIAL: u8 = 62;

/// Map a fetch code to a one-line hint, when there is something useful to say.
pub fn fetch_hint(code: u8) -> Option<&'static str> {
    match code {
        EXIT_FETCH_AUTH => Some("check the provider credentials and their permissions"),
        EXIT_FETCH_RATE_LIMIT => Some("wait a few minutes and run again"),
        EXIT_FETCH_UPSTREAM => Some("run `leadsync check` to test connectivity"),
        _ => None,
    }
}
