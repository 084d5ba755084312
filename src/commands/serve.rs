use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::thread;

use crate::commands::scan::summarize;
use crate::commands::{CommandReport, connect_archive};
use crate::telegram::bot;
use crate::vault::config::load_config;
use crate::vault::history::{HistoryScanner, ManifestHistorySource};
use crate::vault::paths::resolve_paths;

const SERVE_LOCK_FILE: &str = "serve.lock";

/// Hold an exclusive lock for as long as the returned file lives. The pid is
/// written for operators; the lock itself is what keeps a second poller out.
fn acquire_serve_lock(data_dir: &Path) -> Result<fs::File> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let path = data_dir.join(SERVE_LOCK_FILE);
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.try_lock_exclusive().with_context(|| {
        format!(
            "another serve process holds {}; refusing to poll the same bot twice",
            path.display()
        )
    })?;
    file.set_len(0)
        .with_context(|| format!("failed to truncate {}", path.display()))?;
    writeln!(file, "{}", std::process::id())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(file)
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths.vault_home)?;
    let mut report = CommandReport::new("serve");

    let (api, service) = connect_archive(&paths, &cfg)?;
    let _lock = acquire_serve_lock(&paths.data_dir)?;
    tracing::info!(
        data_dir = %paths.data_dir.display(),
        db = %paths.db_file.display(),
        "serving"
    );

    let source = ManifestHistorySource::new(&paths.history_dir);
    thread::scope(|scope| -> Result<()> {
        if cfg.scan.on_startup {
            let service = &service;
            let source = &source;
            scope.spawn(move || match HistoryScanner::new(service).scan_all(source) {
                Ok(scan) => {
                    let summary = summarize(&scan);
                    tracing::info!(
                        owners = scan.owners.len(),
                        failed = scan.total_failed(),
                        "startup history scan finished"
                    );
                    for issue in &summary.issues {
                        tracing::warn!("{issue}");
                    }
                }
                Err(err) => tracing::warn!(error = %err, "startup history scan failed"),
            });
        }
        bot::run(&api, &service, &cfg.bot)
    })?;

    report.detail("bot stopped");
    Ok(report)
}
