pub mod list;
pub mod scan;
pub mod serve;
pub mod status;

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::telegram::api::BotApi;
use crate::telegram::fetch::TelegramFetcher;
use crate::vault::archive::ArchiveService;
use crate::vault::config::{self, VaultConfig};
use crate::vault::paths::VaultPaths;
use crate::vault::store::SqliteRecordStore;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }
}

pub type BotArchive = ArchiveService<SqliteRecordStore, TelegramFetcher>;

/// Everything a networked command needs: the Bot API client and an archive
/// service that downloads through it.
pub fn connect_archive(paths: &VaultPaths, cfg: &VaultConfig) -> Result<(Arc<BotApi>, BotArchive)> {
    let token = config::bot_token()?;
    let api = Arc::new(
        BotApi::new(&cfg.bot.api_base_url, &token)?
            .with_download_timeout(Duration::from_secs(cfg.bot.download_timeout_secs)),
    );
    let store = SqliteRecordStore::open(paths.db_file.clone())
        .with_context(|| format!("failed to open {}", paths.db_file.display()))?;
    let service = ArchiveService::new(
        store,
        TelegramFetcher::new(Arc::clone(&api)),
        paths.data_dir.clone(),
    );
    Ok((api, service))
}
