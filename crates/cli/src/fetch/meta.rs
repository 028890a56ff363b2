//! Meta Graph lead-ads transport.
//!
//! Resolves the lead forms to walk (explicit ids, configured defaults, or
//! discovery of the page's ACTIVE forms), then streams each form's leads via
//! `GET /{form_id}/leads`, following `paging.next` until it disappears.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use leadsync_config::{MetaCredentials, MetaSettings};
use leadsync_recon::model::parse_provider_timestamp;
use leadsync_recon::{FeedError, LeadFeed, LeadPage, RawLead};

use crate::exit_codes;
use crate::CliError;

use super::common::{feed_error, parse_instant, FetchClient};

const FORMS_PAGE_LIMIT: u32 = 100;
/// Window start used when nothing else is configured.
const DEFAULT_SINCE_HOURS: i64 = 24;

const NAME_FIELDS: &[&str] = &["full_name", "name"];
const PHONE_FIELDS: &[&str] = &[
    "phone_number",
    "phone",
    "mobile_phone",
    "mobile",
    "phone_number_with_country_code",
];

// ── Form ids ────────────────────────────────────────────────────────

/// Merge `--form-id` values with the configured defaults.
///
/// Ids are trimmed, blanks and non-numeric ids are dropped, and repeats keep
/// their first position. An empty result means "discover".
pub fn parse_form_ids(explicit: &[String], defaults: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    explicit
        .iter()
        .chain(defaults)
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

// ── Window ──────────────────────────────────────────────────────────

/// Lead creation window. `until` is open-ended when unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeadWindow {
    pub since: DateTime<Utc>,
    pub until: Option<DateTime<Utc>>,
}

/// First non-blank of flag, override and minimum wins; unparseable or
/// absent falls back to `now - 24h`.
pub fn resolve_since(
    flag: Option<&str>,
    override_since: Option<&str>,
    min_created_at: Option<&str>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let fallback = now - Duration::hours(DEFAULT_SINCE_HOURS);
    let chosen = [flag, override_since, min_created_at]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty());

    match chosen {
        None => fallback,
        Some(raw) => parse_instant(raw).unwrap_or_else(|| {
            warn!(since = raw, "unparseable since, using 24 hours ago");
            fallback
        }),
    }
}

/// Graph `filtering` parameter for the window, as epoch seconds.
fn filtering_param(window: &LeadWindow) -> String {
    let mut filters = vec![serde_json::json!({
        "field": "time_created",
        "operator": "GREATER_THAN",
        "value": window.since.timestamp(),
    })];
    if let Some(until) = window.until {
        filters.push(serde_json::json!({
            "field": "time_created",
            "operator": "LESS_THAN",
            "value": until.timestamp(),
        }));
    }
    serde_json::Value::Array(filters).to_string()
}

// ── Client ──────────────────────────────────────────────────────────

pub struct MetaClient {
    client: FetchClient,
    graph_url: String,
    access_token: String,
}

impl MetaClient {
    pub fn new(settings: &MetaSettings, credentials: &MetaCredentials) -> Result<Self, CliError> {
        Self::with_base_url(settings.graph_url(), credentials.access_token.clone())
    }

    pub fn with_base_url(graph_url: String, access_token: String) -> Result<Self, CliError> {
        Ok(Self {
            client: FetchClient::new("Meta", extract_meta_error)?,
            graph_url: graph_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    /// Ids of the page's lead forms whose status is ACTIVE.
    pub fn discover_forms(&self, page_id: &str) -> Result<Vec<String>, CliError> {
        let mut url = format!("{}/{}/leadgen_forms", self.graph_url, page_id);
        let mut first = true;
        let mut active = Vec::new();

        loop {
            let body = if first {
                let limit = FORMS_PAGE_LIMIT.to_string();
                self.client.request_with_retry(|http| {
                    http.get(&url)
                        .query(&[("access_token", self.access_token.as_str()), ("limit", limit.as_str())])
                })?
            } else {
                self.client.request_with_retry(|http| http.get(&url))?
            };
            first = false;

            if let Some(forms) = body["data"].as_array() {
                for form in forms {
                    let id = form["id"].as_str();
                    match (id, form["status"].as_str()) {
                        (Some(id), Some("ACTIVE")) => active.push(id.to_string()),
                        (Some(id), status) => debug!(form_id = id, ?status, "skipping inactive form"),
                        (None, _) => {}
                    }
                }
            }

            match next_url(&body) {
                Some(next) if next == url => {
                    return Err(stuck_pagination(&next));
                }
                Some(next) => url = next,
                None => break,
            }
        }

        info!(page_id, forms = active.len(), "discovered active lead forms");
        Ok(active)
    }

    #[cfg(test)]
    fn with_backoff(mut self, backoff: std::time::Duration) -> Self {
        self.client = self.client.with_backoff(backoff);
        self
    }
}

fn extract_meta_error(body: &serde_json::Value, status: u16) -> String {
    match body["error"]["message"].as_str() {
        Some(msg) => match body["error"]["code"].as_i64() {
            Some(code) => format!("{} (code {})", msg, code),
            None => msg.to_string(),
        },
        None => format!("HTTP {}", status),
    }
}

fn next_url(body: &serde_json::Value) -> Option<String> {
    body["paging"]["next"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn stuck_pagination(url: &str) -> CliError {
    CliError {
        code: exit_codes::EXIT_FETCH_UPSTREAM,
        message: format!("Meta pagination stuck: paging.next repeated ({})", redact_token(url)),
        hint: None,
    }
}

/// Strip `access_token` from a URL before it reaches logs or errors.
fn redact_token(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            let kept: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(k, _)| k != "access_token")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            if kept.is_empty() {
                parsed.set_query(None);
            } else {
                parsed.query_pairs_mut().clear().extend_pairs(kept);
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable url>".to_string(),
    }
}

// ── Feed ────────────────────────────────────────────────────────────

/// One form's lead stream. Forms are independent: a failure stops this
/// form only.
pub struct MetaFormFeed<'c> {
    client: &'c MetaClient,
    form_id: String,
    limit: u32,
    filtering: String,
    /// `None` before the first request, then the continuation URL.
    next: Option<String>,
    fetched: u64,
    failure: Option<u8>,
}

impl<'c> MetaFormFeed<'c> {
    pub fn new(client: &'c MetaClient, form_id: String, window: &LeadWindow, limit: u32) -> Self {
        Self {
            client,
            form_id,
            limit,
            filtering: filtering_param(window),
            next: None,
            fetched: 0,
            failure: None,
        }
    }

    pub fn failure(&self) -> Option<u8> {
        self.failure
    }

    fn request(&self) -> Result<(serde_json::Value, String), CliError> {
        match &self.next {
            None => {
                let url = format!("{}/{}/leads", self.client.graph_url, self.form_id);
                let limit = self.limit.to_string();
                let body = self.client.client.request_with_retry(|http| {
                    http.get(&url).query(&[
                        ("access_token", self.client.access_token.as_str()),
                        ("limit", limit.as_str()),
                        ("filtering", self.filtering.as_str()),
                    ])
                })?;
                Ok((body, url))
            }
            // next URL already carries every parameter
            Some(url) => {
                let body = self.client.client.request_with_retry(|http| http.get(url))?;
                Ok((body, url.clone()))
            }
        }
    }
}

impl LeadFeed for MetaFormFeed<'_> {
    fn label(&self) -> String {
        format!("form={}", self.form_id)
    }

    fn next_page(&mut self) -> Result<LeadPage, FeedError> {
        info!(form_id = %self.form_id, fetched = self.fetched, "requesting Meta leads page");

        let context = format!("after={}", self.fetched);
        let result = self.request().and_then(|(body, requested)| match next_url(&body) {
            Some(next) if next == requested => Err(stuck_pagination(&next)),
            next => Ok((body, next)),
        });
        let (body, next) = result.map_err(|e| {
            self.failure = Some(e.code);
            feed_error(&e, context)
        })?;

        let records: Vec<RawLead> = body["data"]
            .as_array()
            .map(|leads| leads.iter().map(parse_lead).collect())
            .unwrap_or_default();

        debug!(form_id = %self.form_id, fetched = records.len(), more = next.is_some(), "Meta page received");

        let page = LeadPage {
            offset: self.fetched,
            total_count: None,
            has_more: next.is_some(),
            records,
        };
        self.fetched += page.records.len() as u64;
        self.next = next;
        Ok(page)
    }
}

// ── Field extraction ────────────────────────────────────────────────

/// Map one Graph lead object onto a raw lead.
fn parse_lead(lead: &serde_json::Value) -> RawLead {
    let fields = field_map(lead);
    RawLead {
        external_id: lead["id"].as_str().map(str::to_string),
        created_at: lead["created_time"].as_str().and_then(parse_provider_timestamp),
        phone: first_field(&fields, PHONE_FIELDS),
        name: extract_name(&fields),
        payload: lead.clone(),
    }
}

/// `field_data[{name, values[]}]` flattened to `(name, first value)`.
fn field_map(lead: &serde_json::Value) -> Vec<(String, String)> {
    let Some(entries) = lead["field_data"].as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let name = entry["name"].as_str()?;
            let value = match &entry["values"] {
                serde_json::Value::Array(values) => values.first()?.clone(),
                other => other.clone(),
            };
            let text = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((name.to_string(), text))
        })
        .collect()
}

fn first_field(fields: &[(String, String)], names: &[&str]) -> Option<String> {
    names.iter().find_map(|wanted| {
        fields
            .iter()
            .find(|(name, value)| name == wanted && !value.trim().is_empty())
            .map(|(_, value)| value.clone())
    })
}

fn extract_name(fields: &[(String, String)]) -> Option<String> {
    if let Some(full) = first_field(fields, NAME_FIELDS) {
        return Some(full);
    }
    let first = first_field(fields, &["first_name"]).unwrap_or_default();
    let last = first_field(fields, &["last_name"]).unwrap_or_default();
    let joined = format!("{} {}", first, last).trim().to_string();
    (!joined.is_empty()).then_some(joined)
}

// ── Tests ───────────────────────────────────────────────────────────
