//! `leadsync sources`: list registered lead sources and their counters.

use std::io::Write;
use std::path::Path;

use leadsync_recon::{LeadStore, SourceDescriptor};

use crate::exit_codes;
use crate::sync::open_store;
use crate::CliError;

pub fn cmd_sources(db_path: &Path, json: bool) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let sources = store.list_sources().map_err(|e| CliError {
        code: exit_codes::EXIT_STORE,
        message: format!("cannot list sources: {}", e),
        hint: None,
    })?;

    let rendered = if json {
        serde_json::to_string_pretty(&sources).map_err(|e| CliError {
            code: exit_codes::EXIT_ERROR,
            message: format!("cannot serialise sources: {}", e),
            hint: None,
        })?
    } else {
        render_table(&sources)
    };

    writeln!(std::io::stdout().lock(), "{}", rendered).map_err(|e| CliError {
        code: exit_codes::EXIT_ERROR,
        message: format!("cannot write to stdout: {}", e),
        hint: None,
    })
}

fn render_table(sources: &[SourceDescriptor]) -> String {
    if sources.is_empty() {
        return "No sources registered yet.".to_string();
    }

    let name_width = sources
        .iter()
        .map(|s| s.display_name.len())
        .chain(std::iter::once("NAME".len()))
        .max()
        .unwrap_or(4);
    let type_width = sources
        .iter()
        .map(|s| s.source_type.len())
        .chain(std::iter::once("TYPE".len()))
        .max()
        .unwrap_or(4);

    let mut out = format!(
        "{:>4}  {:<nw$}  {:<tw$}  {:>8}  {:>8}",
        "ID",
        "NAME",
        "TYPE",
        "TOTAL",
        "TODAY",
        nw = name_width,
        tw = type_width,
    );
    for s in sources {
        out.push('\n');
        out.push_str(&format!(
            "{:>4}  {:<nw$}  {:<tw$}  {:>8}  {:>8}",
            s.id,
            s.display_name,
            s.source_type,
            s.counters.total,
            s.counters.today,
            nw = name_width,
            tw = type_width,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadsync_recon::model::SourceCounters;

    #[test]
    fn table_aligns_columns() {
        let table = render_table(&[
            SourceDescriptor {
                id: 1,
                display_name: "Meta".into(),
                source_type: "meta_form".into(),
                counters: SourceCounters { total: 12, today: 3 },
            },
            SourceDescriptor {
                id: 2,
                display_name: "Knowlarity".into(),
                source_type: "knowlarity_call".into(),
                counters: SourceCounters { total: 7, today: 0 },
            },
        ]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("  ID  NAME      "));
        assert!(lines[1].contains("Meta        meta_form"));
        assert!(lines[2].ends_with("       7         0"));
    }

    #[test]
    fn empty_registry_message() {
        assert_eq!(render_table(&[]), "No sources registered yet.");
    }
}
