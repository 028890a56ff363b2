//! Shared infrastructure for the lead transports.
//!
//! Each adapter (knowlarity, meta) reuses:
//! - `FetchClient`: HTTP client with retry / backoff / error classification
//! - `parse_instant`: ISO 8601 flag parsing, naive values taken as UTC
//! - `feed_error`: fold a `CliError` into the engine's `FeedError`
//!
//! # Retry contract
//!
//! | Response            | Behaviour                              | Exit code |
//! |---------------------|----------------------------------------|-----------|
//! | 2xx                 | Parse JSON (BOM tolerated)             |:         |
//! | 401 / 403           | Fail immediately                       | 51        |
//! | 400                 | Fail immediately                       | 52        |
//! | other 4xx           | Fail immediately                       | 54        |
//! | 429                 | Retry, honouring `Retry-After`         | 53        |
//! | 5xx / network error | Retry with exponential backoff (1/2/4s)| 54        |

use std::thread;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::warn;

use leadsync_recon::model::parse_timestamp;
use leadsync_recon::FeedError;

use crate::exit_codes;
use crate::CliError;

pub(super) const MAX_RETRIES: u32 = 3;
pub(super) const USER_AGENT: &str = concat!("leadsync/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ── FetchClient ─────────────────────────────────────────────────────

/// Shared HTTP client that handles retry, backoff, and error classification.
///
/// Adapters own their credentials, base URL, and auth headers. They pass a
/// request-building closure to [`FetchClient::request_with_retry`] which
/// handles the retry loop and maps HTTP status codes to the standard exit
/// codes.
pub(super) struct FetchClient {
    http: reqwest::blocking::Client,
    source_name: String,
    error_extractor: fn(&serde_json::Value, u16) -> String,
    backoff: Duration,
}

impl FetchClient {
    pub(super) fn new(
        source_name: &str,
        error_extractor: fn(&serde_json::Value, u16) -> String,
    ) -> Result<Self, CliError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CliError {
                code: exit_codes::EXIT_FETCH_UPSTREAM,
                message: format!("failed to build HTTP client: {}", e),
                hint: None,
            })?;

        Ok(Self {
            http,
            source_name: source_name.to_string(),
            error_extractor,
            backoff: Duration::from_secs(1),
        })
    }

    /// Base delay before the first retry; doubles on each further attempt.
    #[cfg(test)]
    pub(super) fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Make a GET request with retry + exponential backoff.
    ///
    /// `build_request` is called once per attempt. It receives the
    /// underlying `reqwest::blocking::Client` and must return a fully
    /// configured `RequestBuilder` (URL, auth, headers, query params).
    pub(super) fn request_with_retry(
        &self,
        build_request: impl Fn(&reqwest::blocking::Client) -> reqwest::blocking::RequestBuilder,
    ) -> Result<serde_json::Value, CliError> {
        let mut backoff = self.backoff;
        let mut attempt = 0u32;

        loop {
            match build_request(&self.http).send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();

                    // Auth errors: fail immediately
                    if status == 401 || status == 403 {
                        return Err(self.rejected(resp, exit_codes::EXIT_FETCH_AUTH, "auth failed"));
                    }

                    // Bad request: fail immediately
                    if status == 400 {
                        return Err(self.rejected(
                            resp,
                            exit_codes::EXIT_FETCH_VALIDATION,
                            "request rejected",
                        ));
                    }

                    // Other 4xx (not 429): fail immediately
                    if (400..500).contains(&status) && status != 429 {
                        return Err(self.rejected(resp, exit_codes::EXIT_FETCH_UPSTREAM, "error"));
                    }

                    // Retryable: 429, 5xx
                    if status == 429 || status >= 500 {
                        if attempt == MAX_RETRIES {
                            let (code, what) = if status == 429 {
                                (exit_codes::EXIT_FETCH_RATE_LIMIT, "rate limited")
                            } else {
                                (exit_codes::EXIT_FETCH_UPSTREAM, "upstream error")
                            };
                            return Err(CliError {
                                code,
                                message: format!(
                                    "{} {} after {} attempts ({})",
                                    self.source_name,
                                    what,
                                    MAX_RETRIES + 1,
                                    status,
                                ),
                                hint: None,
                            });
                        }

                        // Respect Retry-After header for 429
                        let wait = if status == 429 {
                            resp.headers()
                                .get("retry-after")
                                .and_then(|v| v.to_str().ok())
                                .and_then(|v| v.trim().parse::<u64>().ok())
                                .map(Duration::from_secs)
                                .unwrap_or(backoff)
                        } else {
                            backoff
                        };

                        warn!(
                            source = %self.source_name,
                            status,
                            "retry {}/{} in {:?}",
                            attempt + 1,
                            MAX_RETRIES,
                            wait,
                        );
                        thread::sleep(wait);
                        backoff *= 2;
                        attempt += 1;
                        continue;
                    }

                    // Success: read as text first so a BOM-prefixed body still parses
                    let text = resp.text().map_err(|e| CliError {
                        code: exit_codes::EXIT_FETCH_UPSTREAM,
                        message: format!(
                            "failed to read {} response body: {}",
                            self.source_name, e,
                        ),
                        hint: None,
                    })?;
                    let trimmed = text.trim_start_matches('\u{feff}');
                    return serde_json::from_str(trimmed).map_err(|e| CliError {
                        code: exit_codes::EXIT_FETCH_UPSTREAM,
                        message: format!(
                            "failed to parse {} JSON response: {} (body: {})",
                            self.source_name,
                            e,
                            truncate(trimmed, 200),
                        ),
                        hint: None,
                    });
                }
                Err(e) => {
                    // Network/timeout errors: retry
                    if attempt == MAX_RETRIES {
                        return Err(CliError {
                            code: exit_codes::EXIT_FETCH_UPSTREAM,
                            message: format!(
                                "{} upstream error after {} attempts: {}",
                                self.source_name,
                                MAX_RETRIES + 1,
                                e,
                            ),
                            hint: None,
                        });
                    }

                    warn!(
                        source = %self.source_name,
                        "retry {}/{} in {:?} ({})",
                        attempt + 1,
                        MAX_RETRIES,
                        backoff,
                        e,
                    );
                    thread::sleep(backoff);
                    backoff *= 2;
                    attempt += 1;
                }
            }
        }
    }

    fn rejected(&self, resp: reqwest::blocking::Response, code: u8, what: &str) -> CliError {
        let status = resp.status().as_u16();
        let body: serde_json::Value = resp
            .text()
            .ok()
            .and_then(|t| serde_json::from_str(t.trim_start_matches('\u{feff}')).ok())
            .unwrap_or(serde_json::Value::Null);
        let msg = (self.error_extractor)(&body, status);
        CliError {
            code,
            message: format!("{} {} ({}): {}", self.source_name, what, status, msg),
            hint: None,
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Cut `s` to at most `max` characters without splitting a code point.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Parse an ISO 8601 instant from a flag or env value.
///
/// Accepts everything the engine's timestamp parser does plus a bare
/// `YYYY-MM-DD` (midnight). Values without an offset are UTC.
pub(crate) fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    parse_timestamp(raw).or_else(|| {
        NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    })
}

/// Fold a transport failure into the engine's page-level error.
pub(super) fn feed_error(err: &CliError, context: String) -> FeedError {
    FeedError::new(err.message.clone()).with_context(context)
}

// ── Tests ───────────────────────────────────────────────────────────
