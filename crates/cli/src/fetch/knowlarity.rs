//! Knowlarity call-log transport.
//!
//! Walks `GET {api_url}?start_time&end_time&limit&offset` with the
//! `x-api-key` / `authorization` / `channel` headers, advancing the offset by
//! the number of records each page returned.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use leadsync_config::{KnowlarityCredentials, KnowlaritySettings};
use leadsync_recon::model::parse_provider_timestamp;
use leadsync_recon::{FeedError, LeadFeed, LeadPage, RawLead};

use crate::CliError;

use super::common::{feed_error, FetchClient};

/// Wire format for `start_time` / `end_time`.
const KNOWLARITY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ── Client ──────────────────────────────────────────────────────────

pub struct KnowlarityClient {
    client: FetchClient,
    api_url: String,
    credentials: KnowlarityCredentials,
    channel: String,
}

impl KnowlarityClient {
    pub fn new(settings: &KnowlaritySettings, credentials: KnowlarityCredentials) -> Result<Self, CliError> {
        Self::with_base_url(credentials, settings.channel.clone(), settings.api_url.clone())
    }

    pub fn with_base_url(
        credentials: KnowlarityCredentials,
        channel: String,
        api_url: String,
    ) -> Result<Self, CliError> {
        Ok(Self {
            client: FetchClient::new("Knowlarity", extract_knowlarity_error)?,
            api_url,
            credentials,
            channel,
        })
    }

    fn fetch_page(
        &self,
        window: &CallWindow,
        limit: u32,
        offset: u64,
    ) -> Result<serde_json::Value, CliError> {
        let params = [
            ("start_time", window.start.format(KNOWLARITY_DATE_FORMAT).to_string()),
            ("end_time", window.end.format(KNOWLARITY_DATE_FORMAT).to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];

        self.client.request_with_retry(|http| {
            http.get(&self.api_url)
                .query(&params)
                .header("x-api-key", &self.credentials.api_key)
                .header("authorization", &self.credentials.auth_token)
                .header("channel", &self.channel)
        })
    }

    #[cfg(test)]
    fn with_backoff(mut self, backoff: std::time::Duration) -> Self {
        self.client = self.client.with_backoff(backoff);
        self
    }
}

fn extract_knowlarity_error(body: &serde_json::Value, status: u16) -> String {
    body["message"]
        .as_str()
        .or_else(|| body["error"].as_str())
        .or_else(|| body["error"]["message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status))
}

// ── Window ──────────────────────────────────────────────────────────

/// Call-log query window, both ends UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CallWindow {
    /// Explicit ends win; otherwise `end = now` and `start = end - lookback`.
    pub fn resolve(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        lookback_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, CliError> {
        let end = end.unwrap_or(now);
        let start = start.unwrap_or(end - chrono::Duration::minutes(lookback_minutes));
        if start >= end {
            return Err(CliError::args(format!(
                "--start-time ({}) must be before --end-time ({})",
                start.to_rfc3339(),
                end.to_rfc3339(),
            )));
        }
        Ok(Self { start, end })
    }
}

// ── Feed ────────────────────────────────────────────────────────────

/// Offset-paged stream of call-log records for one window.
pub struct KnowlarityFeed<'c> {
    client: &'c KnowlarityClient,
    window: CallWindow,
    limit: u32,
    offset: u64,
    failure: Option<u8>,
}

impl<'c> KnowlarityFeed<'c> {
    pub fn new(client: &'c KnowlarityClient, window: CallWindow, limit: u32, offset: u64) -> Self {
        Self {
            client,
            window,
            limit,
            offset,
            failure: None,
        }
    }

    /// Exit code of the transport failure that stopped the stream, if any.
    pub fn failure(&self) -> Option<u8> {
        self.failure
    }
}

impl LeadFeed for KnowlarityFeed<'_> {
    fn label(&self) -> String {
        "knowlarity".to_string()
    }

    fn next_page(&mut self) -> Result<LeadPage, FeedError> {
        info!(
            offset = self.offset,
            limit = self.limit,
            start = %self.window.start,
            end = %self.window.end,
            "requesting Knowlarity page"
        );

        let body = self
            .client
            .fetch_page(&self.window, self.limit, self.offset)
            .map_err(|e| {
                self.failure = Some(e.code);
                feed_error(&e, format!("offset={}", self.offset))
            })?;

        let records: Vec<RawLead> = body["objects"]
            .as_array()
            .map(|objects| objects.iter().map(parse_call).collect())
            .unwrap_or_default();
        let total_count = body["meta"]["total_count"].as_u64();

        debug!(
            offset = self.offset,
            fetched = records.len(),
            total_count = ?total_count,
            "Knowlarity page received"
        );

        let page = LeadPage {
            offset: self.offset,
            total_count,
            has_more: !records.is_empty(),
            records,
        };
        self.offset += page.records.len() as u64;
        Ok(page)
    }
}

/// Map one call-log object onto a raw lead. Name is left empty so the
/// engine derives it from the source and phone.
fn parse_call(call: &serde_json::Value) -> RawLead {
    let phone = non_empty(&call["customer_number"]).or_else(|| non_empty(&call["caller_id"]));
    RawLead {
        external_id: non_empty(&call["uuid"]),
        created_at: call["start_time"].as_str().and_then(parse_provider_timestamp),
        phone,
        name: None,
        payload: call.clone(),
    }
}

/// String or number field as text; empty strings and nulls are absent.
fn non_empty(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── Tests ───────────────────────────────────────────────────────────
