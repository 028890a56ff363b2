//! `leadsync check`: one-shot reachability probe for the Meta Graph API.
//!
//! Any HTTP response counts as reachable; only a transport failure (DNS,
//! TLS, refused, timeout) fails the check.

use std::io::Write;
use std::time::Duration;

use tracing::debug;

use crate::exit_codes;
use crate::fetch::truncate;
use crate::CliError;

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const PREVIEW_CHARS: usize = 100;

const LIKELY_CAUSES: &[&str] = &[
    "a firewall or antivirus blocking outbound HTTPS",
    "the ISP blocking the Facebook Graph API",
    "an unstable VPN connection",
];

/// Result of a reachability probe.
#[derive(Debug)]
pub struct Probe {
    pub status: u16,
    pub preview: String,
}

pub fn probe(url: &str) -> Result<Probe, reqwest::Error> {
    let http = reqwest::blocking::Client::builder()
        .timeout(CHECK_TIMEOUT)
        .user_agent(concat!("leadsync/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let resp = http.get(url).send()?;
    let status = resp.status().as_u16();
    // A body that fails to decode still proves the host answered.
    let body = resp.text().unwrap_or_default();
    Ok(Probe {
        status,
        preview: truncate(&body, PREVIEW_CHARS).to_string(),
    })
}

pub fn cmd_check(url: &str) -> Result<(), CliError> {
    let mut out = std::io::stdout().lock();
    let write_err = |e: std::io::Error| CliError {
        code: exit_codes::EXIT_ERROR,
        message: format!("cannot write to stdout: {}", e),
        hint: None,
    };

    writeln!(out, "Testing connection to {}...", url).map_err(write_err)?;
    match probe(url) {
        Ok(probe) => {
            debug!(status = probe.status, "check succeeded");
            writeln!(out, "Success! Status code: {}", probe.status).map_err(write_err)?;
            writeln!(out, "Response: {}...", probe.preview).map_err(write_err)?;
            Ok(())
        }
        Err(e) => {
            writeln!(out, "Connection failed: {}", e).map_err(write_err)?;
            writeln!(out).map_err(write_err)?;
            writeln!(out, "Possible causes:").map_err(write_err)?;
            for (i, cause) in LIKELY_CAUSES.iter().enumerate() {
                writeln!(out, "{}. {}", i + 1, cause).map_err(write_err)?;
            }
            Err(CliError {
                code: exit_codes::EXIT_FETCH_UPSTREAM,
                message: format!("cannot reach {}", url),
                hint: None,
            })
        }
    }
}
