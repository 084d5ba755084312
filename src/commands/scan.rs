use anyhow::{Context, Result};

use crate::commands::{CommandReport, connect_archive};
use crate::vault::config::load_config;
use crate::vault::history::{HistoryScanner, ManifestHistorySource, ScanReport};
use crate::vault::paths::resolve_paths;

/// Per-owner counts as report lines; owners with failures become issues.
pub fn summarize(scan: &ScanReport) -> CommandReport {
    let mut report = CommandReport::new("scan");
    report.detail(format!("owners={}", scan.owners.len()));

    for (owner_id, counts) in &scan.owners {
        report.detail(format!(
            "owner={owner_id} processed={} saved={} already_known={} failed={}",
            counts.processed, counts.saved, counts.already_known, counts.failed
        ));
        if let Some(err) = &counts.source_error {
            report.issue(format!("owner={owner_id} history unavailable: {err}"));
        } else if counts.failed > 0 {
            report.issue(format!(
                "owner={owner_id} failed={} (retried on next scan)",
                counts.failed
            ));
        }
    }
    report
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths.vault_home)?;
    let mut report = CommandReport::new("scan");
    report.detail(format!("history_dir={}", paths.history_dir.display()));

    let (_api, service) = connect_archive(&paths, &cfg)?;
    let source = ManifestHistorySource::new(&paths.history_dir);
    let scan = HistoryScanner::new(&service)
        .scan_all(&source)
        .context("history scan failed")?;

    report.merge(summarize(&scan));
    Ok(report)
}
