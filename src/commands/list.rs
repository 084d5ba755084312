use anyhow::{Context, Result};

use crate::commands::CommandReport;
use crate::vault::config::load_config;
use crate::vault::listing::render_file_list;
use crate::vault::paths::resolve_paths;
use crate::vault::store::{RecordStore, SqliteRecordStore};

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub owner_id: i64,
}

/// Prints the same chunks the bot would send for `/list`.
pub fn run(opts: &ListOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths.vault_home)?;
    let mut report = CommandReport::new("list");

    let store = SqliteRecordStore::open(paths.db_file.clone())
        .with_context(|| format!("failed to open {}", paths.db_file.display()))?;
    let names = store
        .list_filenames(opts.owner_id)
        .with_context(|| format!("failed to list files for owner {}", opts.owner_id))?;

    report.detail(format!("owner={}", opts.owner_id));
    for chunk in render_file_list(&names, cfg.bot.list_chunk_chars) {
        report.detail(chunk);
    }
    Ok(report)
}
