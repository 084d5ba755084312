use crate::error::DownloadError;
use crate::telegram::api::BotApi;
use crate::vault::descriptor::MediaDescriptor;
use crate::vault::reconcile::MediaFetcher;
use std::io::Read;
use std::sync::Arc;

/// Streams an object's bytes through `getFile` plus the file endpoint. The
/// descriptor's `source_ref` is the Bot API `file_id`.
#[derive(Clone)]
pub struct TelegramFetcher {
    api: Arc<BotApi>,
}

impl TelegramFetcher {
    pub fn new(api: Arc<BotApi>) -> Self {
        Self { api }
    }
}

fn transport(err: anyhow::Error) -> DownloadError {
    DownloadError::Transport(format!("{err:#}"))
}

impl MediaFetcher for TelegramFetcher {
    fn open(&self, descriptor: &MediaDescriptor) -> Result<Box<dyn Read + Send>, DownloadError> {
        let file = self.api.get_file(&descriptor.source_ref).map_err(transport)?;
        let Some(file_path) = file.file_path.filter(|p| !p.trim().is_empty()) else {
            return Err(DownloadError::Transport(format!(
                "no download path for {}",
                descriptor.unique_media_id
            )));
        };
        let resp = self.api.download(&file_path).map_err(transport)?;
        Ok(Box::new(resp))
    }
}
