use anyhow::Result;

use crate::commands::CommandReport;
use crate::vault::config::{self, load_config, resolve_config_path};
use crate::vault::paths::resolve_paths;
use crate::vault::store::SqliteRecordStore;

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("vault_home={}", paths.vault_home.display()));
    report.detail(format!("data_dir={}", paths.data_dir.display()));
    report.detail(format!("db_file={}", paths.db_file.display()));
    report.detail(format!("history_dir={}", paths.history_dir.display()));

    let config_path = resolve_config_path(&paths.vault_home);
    report.detail(format!(
        "config_path={} present={}",
        config_path.display(),
        config_path.exists()
    ));

    match load_config(&paths.vault_home) {
        Ok(cfg) => {
            report.detail(format!("bot.api_base_url={}", cfg.bot.api_base_url));
            report.detail(format!("bot.poll_timeout_secs={}", cfg.bot.poll_timeout_secs));
            report.detail(format!(
                "bot.download_timeout_secs={}",
                cfg.bot.download_timeout_secs
            ));
            report.detail(format!("bot.list_chunk_chars={}", cfg.bot.list_chunk_chars));
            let owners = cfg
                .bot
                .allowed_owners
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>();
            report.detail(format!(
                "bot.allowed_owners={}",
                if owners.is_empty() {
                    "*".to_string()
                } else {
                    owners.join(",")
                }
            ));
            report.detail(format!("scan.on_startup={}", cfg.scan.on_startup));
        }
        Err(err) => report.issue(format!("config invalid: {err}")),
    }

    let token_state = match config::bot_token() {
        Ok(_) => "set",
        Err(_) => "missing",
    };
    report.detail(format!("token={token_state}"));

    // Report only: a vault that was never used stays untouched.
    if !paths.db_file.is_file() {
        report.detail("db=absent");
        report.detail("owners=0");
        return Ok(report);
    }

    match SqliteRecordStore::open(paths.db_file.clone()).and_then(|store| store.count_by_owner()) {
        Ok(counts) => {
            report.detail(format!("owners={}", counts.len()));
            for (owner_id, records) in counts {
                report.detail(format!("owner={owner_id} records={records}"));
            }
        }
        Err(err) => report.issue(format!("store unavailable: {err}")),
    }

    Ok(report)
}
