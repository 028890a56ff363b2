//! `leadsync sync`: pull leads from a provider and reconcile them into the
//! local registry.
//!
//! Every run prints one JSON summary on stdout, including runs that recorded
//! errors. The exit code then says whether the run was clean (0), partial
//! (62), or failed upstream before anything was processed (51-54).

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::Serialize;
use tracing::{info, warn};

use leadsync_config::{ConfigError, Settings};
use leadsync_recon::model::ErrorScope;
use leadsync_recon::{
    FeedError, FlushPolicy, ReconError, Reconciler, RunOptions, RunSummary, SourceKey,
};
use leadsync_store::{SqliteStore, StorageError};

use crate::exit_codes;
use crate::fetch::knowlarity::{CallWindow, KnowlarityClient, KnowlarityFeed};
use crate::fetch::meta::{self, LeadWindow, MetaClient, MetaFormFeed};
use crate::fetch::parse_instant;
use crate::CliError;

const NO_FORMS_MESSAGE: &str =
    "No lead forms found. Meta returned zero active forms. Confirm page access and permissions.";
const DISCOVERY_FAILED_MESSAGE: &str = "Lead form discovery failed.";

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Sync call-log leads from Knowlarity
    #[command(after_help = "\
Examples:
  leadsync sync knowlarity
  leadsync sync knowlarity --start-time 2026-03-10T00:00:00 --end-time 2026-03-10T12:00:00
  leadsync sync knowlarity --limit 50 --offset 200")]
    Knowlarity {
        /// Window start, ISO 8601, naive = UTC (default: end minus KNOWLARITY_SYNC_LOOKBACK_MINUTES)
        #[arg(long)]
        start_time: Option<String>,

        /// Window end, ISO 8601, naive = UTC (default: now)
        #[arg(long)]
        end_time: Option<String>,

        /// Page size (default: KNOWLARITY_SYNC_PAGE_SIZE)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        limit: Option<u32>,

        /// Initial offset
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },

    /// Sync lead-ad submissions from Meta lead forms
    #[command(after_help = "\
Examples:
  leadsync sync meta
  leadsync sync meta --form-id 1234567890 --form-id 2345678901
  leadsync sync meta --since 2026-03-01T00:00:00Z --until 2026-03-02T00:00:00Z")]
    Meta {
        /// Lead form id. Repeatable; merged with META_FORM_IDS_DEFAULT.
        /// With no ids, the page's ACTIVE forms are discovered.
        #[arg(long = "form-id", value_name = "ID")]
        form_ids: Vec<String>,

        /// Only leads created after this instant (default: META_SYNC_SINCE_OVERRIDE,
        /// META_MIN_CREATED_AT, or 24 hours ago)
        #[arg(long)]
        since: Option<String>,

        /// Only leads created before this instant
        #[arg(long)]
        until: Option<String>,

        /// Per-page limit when fetching leads
        #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..))]
        limit: u32,
    },
}

pub fn cmd_sync(command: SyncCommands, settings: &Settings) -> Result<(), CliError> {
    match command {
        SyncCommands::Knowlarity {
            start_time,
            end_time,
            limit,
            offset,
        } => sync_knowlarity(settings, start_time, end_time, limit, offset),
        SyncCommands::Meta {
            form_ids,
            since,
            until,
            limit,
        } => sync_meta(settings, form_ids, since, until, limit),
    }
}

pub fn knowlarity_source() -> SourceKey {
    SourceKey::new("Knowlarity", "knowlarity_call")
}

pub fn meta_source() -> SourceKey {
    SourceKey::new("Meta", "meta_form")
}

// ── Knowlarity ──────────────────────────────────────────────────────

fn sync_knowlarity(
    settings: &Settings,
    start_time: Option<String>,
    end_time: Option<String>,
    limit: Option<u32>,
    offset: u64,
) -> Result<(), CliError> {
    let start = parse_flag("--start-time", start_time.as_deref())?;
    let end = parse_flag("--end-time", end_time.as_deref())?;
    let k = &settings.knowlarity;
    let window = CallWindow::resolve(start, end, k.lookback_minutes, Utc::now())?;

    let credentials = k.credentials().map_err(config_error)?;
    let store = open_store(&settings.db_path)?;
    let client = KnowlarityClient::new(k, credentials)?;

    info!(start = %window.start, end = %window.end, "Knowlarity sync started");

    let mut feed = KnowlarityFeed::new(&client, window, limit.unwrap_or(k.page_size), offset);
    let mut recon = Reconciler::begin(&store, &knowlarity_source(), RunOptions::now(FlushPolicy::EndOfRun))
        .map_err(registry_error)?;
    recon.ingest(&mut feed);
    let summary = recon.finish();

    emit(&SyncReport {
        pipeline: "knowlarity",
        window_start: window.start,
        window_end: Some(window.end),
        forms_processed: None,
        auto_discovered_forms: None,
        message: None,
        summary: &summary,
    })?;
    run_outcome(&summary, &feed.failure().into_iter().collect::<Vec<_>>())
}

// ── Meta ────────────────────────────────────────────────────────────

fn sync_meta(
    settings: &Settings,
    form_ids: Vec<String>,
    since: Option<String>,
    until: Option<String>,
    limit: u32,
) -> Result<(), CliError> {
    let until = parse_flag("--until", until.as_deref())?;
    let m = &settings.meta;
    let since = meta::resolve_since(
        since.as_deref(),
        m.since_override.as_deref(),
        m.min_created_at.as_deref(),
        Utc::now(),
    );
    if let Some(until) = until {
        if until <= since {
            return Err(CliError::args(format!(
                "--until ({}) must be after the window start ({})",
                until.to_rfc3339(),
                since.to_rfc3339(),
            )));
        }
    }
    let window = LeadWindow { since, until };

    let credentials = m.credentials().map_err(config_error)?;
    let store = open_store(&settings.db_path)?;
    let client = MetaClient::new(m, &credentials)?;

    let mut forms = meta::parse_form_ids(&form_ids, &m.default_form_ids);
    let mut auto_discovered = 0;
    if forms.is_empty() {
        match client.discover_forms(&credentials.page_id) {
            Ok(found) => {
                forms = found;
                auto_discovered = forms.len();
            }
            Err(e) => return report_discovery_failure(&store, &window, e),
        }
    }

    if forms.is_empty() {
        info!("no lead forms to sync");
        let summary = RunSummary {
            counters_synced: true,
            ..RunSummary::default()
        };
        return emit(&SyncReport {
            pipeline: "meta",
            window_start: window.since,
            window_end: window.until,
            forms_processed: Some(0),
            auto_discovered_forms: Some(0),
            message: Some(NO_FORMS_MESSAGE),
            summary: &summary,
        });
    }

    info!(forms = forms.len(), since = %window.since, "Meta sync started");

    let options = RunOptions::now(FlushPolicy::PerRecord).with_not_before(window.since);
    let mut recon = Reconciler::begin(&store, &meta_source(), options).map_err(registry_error)?;
    let mut failures = Vec::new();
    for form_id in &forms {
        info!(form_id = %form_id, "processing form");
        let mut feed = MetaFormFeed::new(&client, form_id.clone(), &window, limit);
        recon.ingest(&mut feed);
        failures.extend(feed.failure());
    }
    let summary = recon.finish();

    emit(&SyncReport {
        pipeline: "meta",
        window_start: window.since,
        window_end: window.until,
        forms_processed: Some(forms.len()),
        auto_discovered_forms: Some(auto_discovered),
        message: Some("Meta lead sync completed."),
        summary: &summary,
    })?;
    run_outcome(&summary, &failures)
}

/// Discovery failed, so no form can be read; the run still reports.
fn report_discovery_failure(
    store: &SqliteStore,
    window: &LeadWindow,
    e: CliError,
) -> Result<(), CliError> {
    warn!("lead form discovery failed: {}", e.message);
    let options = RunOptions::now(FlushPolicy::PerRecord).with_not_before(window.since);
    let mut recon = Reconciler::begin(store, &meta_source(), options).map_err(registry_error)?;
    recon.record_page_error("leadgen_forms", FeedError::new(e.message));
    let summary = recon.finish();

    emit(&SyncReport {
        pipeline: "meta",
        window_start: window.since,
        window_end: window.until,
        forms_processed: Some(0),
        auto_discovered_forms: Some(0),
        message: Some(DISCOVERY_FAILED_MESSAGE),
        summary: &summary,
    })?;
    run_outcome(&summary, &[e.code])
}

// ── Report ──────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncReport<'a> {
    pipeline: &'static str,
    window_start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    window_end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    forms_processed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auto_discovered_forms: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    #[serde(flatten)]
    summary: &'a RunSummary,
}

fn emit<T: Serialize>(report: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(report).map_err(|e| CliError {
        code: exit_codes::EXIT_ERROR,
        message: format!("cannot serialise summary: {}", e),
        hint: None,
    })?;
    writeln!(std::io::stdout().lock(), "{}", json).map_err(|e| CliError {
        code: exit_codes::EXIT_ERROR,
        message: format!("cannot write summary: {}", e),
        hint: None,
    })
}

/// Exit status for a finished run.
///
/// A run that processed nothing because every stream failed upstream takes
/// the transport's code; any other run with recorded errors is partial.
fn run_outcome(summary: &RunSummary, failures: &[u8]) -> Result<(), CliError> {
    if summary.errors.is_empty() {
        return Ok(());
    }

    if summary.processed == 0 {
        if let Some(&code) = failures.first() {
            let cause = summary
                .errors
                .iter()
                .find(|e| e.scope == ErrorScope::Page)
                .map(|e| e.message.as_str())
                .unwrap_or("upstream failure");
            return Err(with_fetch_hint(CliError {
                code,
                message: format!("sync failed: {}", cause),
                hint: None,
            }));
        }
    }

    Err(CliError {
        code: exit_codes::EXIT_PARTIAL,
        message: format!(
            "sync finished with {} error(s); {} record(s) applied",
            summary.errors.len(),
            summary.applied(),
        ),
        hint: Some("see `errors` in the JSON summary".into()),
    })
}

// ── Helpers ─────────────────────────────────────────────────────────

fn parse_flag(flag: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, CliError> {
    match raw {
        None => Ok(None),
        Some(raw) => parse_instant(raw)
            .map(Some)
            .ok_or_else(|| CliError::args(format!("invalid {} {:?}: expected ISO 8601", flag, raw))),
    }
}

pub(crate) fn open_store(path: &Path) -> Result<SqliteStore, CliError> {
    SqliteStore::open(path).map_err(|e: StorageError| CliError {
        code: exit_codes::EXIT_STORE,
        message: format!("cannot open lead store {}: {}", path.display(), e),
        hint: Some("set LEADSYNC_DB or pass --db to choose another location".into()),
    })
}

pub(crate) fn config_error(e: ConfigError) -> CliError {
    let hint = match &e {
        ConfigError::Missing { .. } => {
            Some("set them in the environment, a .env file, or ~/.config/leadsync/config.toml".into())
        }
        _ => None,
    };
    CliError {
        code: exit_codes::EXIT_CONFIG,
        message: e.to_string(),
        hint,
    }
}

fn registry_error(e: ReconError) -> CliError {
    CliError {
        code: exit_codes::EXIT_STORE,
        message: e.to_string(),
        hint: None,
    }
}

fn with_fetch_hint(mut e: CliError) -> CliError {
    if e.hint.is_none() {
        e.hint = exit_codes::fetch_hint(e.code).map(str::to_string);
    }
    e
}
